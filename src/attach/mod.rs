pub mod ocr;
pub mod office;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ExtractionError;

/// File types the pipeline will attempt to extract text from.
pub const ATTACHMENT_EXTS: &[&str] = &[
    "pdf", "hwp", "hwpx", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip",
];

/// Below this many characters per page the text layer is considered
/// missing and the chain falls through to OCR.
pub const MIN_CHARS_PER_PAGE: usize = 25;

#[derive(Debug)]
pub struct ExtractedText {
    pub text: String,
    pub pages: usize,
}

/// One tool in the fallback chain. Adding a format means adding an
/// implementation, not branching existing code.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, ext: &str) -> bool;
    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractionError>;
    /// Last-resort tools keep whatever they got; everyone else is gated
    /// by the near-empty heuristic.
    fn accepts_sparse_output(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct StepRecord {
    pub tool: &'static str,
    pub elapsed_ms: u128,
    pub outcome: Result<(), String>,
}

#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub text: Option<String>,
    pub tool: Option<&'static str>,
    pub is_ocr: bool,
    pub steps: Vec<StepRecord>,
}

impl ChainOutcome {
    pub fn total_ms(&self) -> u128 {
        self.steps.iter().map(|s| s.elapsed_ms).sum()
    }
}

/// Ordered tool chain: native text first, format conversion second, OCR
/// last. `run` never fails the caller; a fully failed chain is an
/// outcome with no text.
pub struct ExtractionChain {
    extractors: Vec<Box<dyn Extractor>>,
    min_chars_per_page: usize,
}

impl ExtractionChain {
    pub fn new(extractors: Vec<Box<dyn Extractor>>, min_chars_per_page: usize) -> Self {
        Self {
            extractors,
            min_chars_per_page,
        }
    }

    /// The production chain. `scratch` holds converted PDFs and rendered
    /// page images for the duration of a run.
    pub fn standard(scratch: PathBuf) -> Self {
        Self::new(
            vec![
                Box::new(pdf::PdfTextExtractor),
                Box::new(office::OfficeConvertExtractor::new(scratch.clone())),
                Box::new(ocr::OcrExtractor::new(scratch)),
            ],
            MIN_CHARS_PER_PAGE,
        )
    }

    pub fn run(&self, path: &Path) -> ChainOutcome {
        let ext = extension_of(path);
        let mut outcome = ChainOutcome::default();

        let eligible: Vec<&dyn Extractor> = self
            .extractors
            .iter()
            .map(|e| e.as_ref())
            .filter(|e| e.supports(&ext))
            .collect();
        if eligible.is_empty() {
            outcome.steps.push(StepRecord {
                tool: "none",
                elapsed_ms: 0,
                outcome: Err(ExtractionError::Unsupported(ext).to_string()),
            });
            return outcome;
        }

        for extractor in eligible {
            let start = Instant::now();
            let result = extractor.extract(path).and_then(|t| {
                let chars = t.text.chars().filter(|c| !c.is_whitespace()).count();
                let pages = t.pages.max(1);
                if !extractor.accepts_sparse_output() && chars < self.min_chars_per_page * pages {
                    Err(ExtractionError::NearEmpty { chars, pages })
                } else {
                    Ok(t)
                }
            });
            let elapsed_ms = start.elapsed().as_millis();

            match result {
                Ok(t) => {
                    outcome.steps.push(StepRecord {
                        tool: extractor.name(),
                        elapsed_ms,
                        outcome: Ok(()),
                    });
                    outcome.is_ocr = extractor.name() == ocr::TOOL_NAME;
                    outcome.tool = Some(extractor.name());
                    outcome.text = Some(t.text);
                    return outcome;
                }
                Err(e) => {
                    debug!("{} failed on {}: {}", extractor.name(), path.display(), e);
                    outcome.steps.push(StepRecord {
                        tool: extractor.name(),
                        elapsed_ms,
                        outcome: Err(e.to_string()),
                    });
                }
            }
        }
        outcome
    }
}

/// Stable attachment identifier: survives re-runs and item merging, so
/// the extracted-text file name never moves.
pub fn attachment_id(platform: &str, record_id: &str, file_name: &str) -> String {
    let digest = Sha256::digest(format!("{platform}|{record_id}|{file_name}").as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Extractable files under a record's attachment directory, sorted for
/// deterministic ordering.
pub fn list_attachments(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && ATTACHMENT_EXTS.contains(&extension_of(p).as_str()))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Run an external tool, mapping spawn failures and non-zero exits to an
/// extraction error.
pub(crate) fn run_tool(tool: &'static str, cmd: &mut Command) -> Result<std::process::Output, ExtractionError> {
    let output = cmd.output().map_err(|e| ExtractionError::Tool {
        tool,
        detail: format!("spawn failed: {e}"),
    })?;
    if !output.status.success() {
        return Err(ExtractionError::Tool {
            tool,
            detail: format!(
                "exit {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

pub(crate) fn short_hash(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeExtractor {
        name: &'static str,
        ext: &'static str,
        result: Result<(&'static str, usize), &'static str>,
        sparse_ok: bool,
    }

    impl Extractor for FakeExtractor {
        fn name(&self) -> &'static str {
            self.name
        }
        fn supports(&self, ext: &str) -> bool {
            ext == self.ext
        }
        fn extract(&self, _path: &Path) -> Result<ExtractedText, ExtractionError> {
            match self.result {
                Ok((text, pages)) => Ok(ExtractedText {
                    text: text.to_string(),
                    pages,
                }),
                Err(detail) => Err(ExtractionError::Tool {
                    tool: self.name,
                    detail: detail.to_string(),
                }),
            }
        }
        fn accepts_sparse_output(&self) -> bool {
            self.sparse_ok
        }
    }

    const LONG_TEXT: &str = "입주자격 및 임대조건은 본문과 같으며 신청방법, 접수기간, 당첨자 발표 일정과 유의사항을 반드시 확인하시기 바랍니다";

    #[test]
    fn first_success_wins() {
        let chain = ExtractionChain::new(
            vec![
                Box::new(FakeExtractor {
                    name: "a",
                    ext: "pdf",
                    result: Ok((LONG_TEXT, 1)),
                    sparse_ok: false,
                }),
                Box::new(FakeExtractor {
                    name: "b",
                    ext: "pdf",
                    result: Ok(("other", 1)),
                    sparse_ok: false,
                }),
            ],
            MIN_CHARS_PER_PAGE,
        );
        let outcome = chain.run(Path::new("x.pdf"));
        assert_eq!(outcome.tool, Some("a"));
        assert!(!outcome.is_ocr);
        assert_eq!(outcome.steps.len(), 1);
    }

    #[test]
    fn near_empty_falls_through_to_sparse_tool() {
        let chain = ExtractionChain::new(
            vec![
                Box::new(FakeExtractor {
                    name: "text_layer",
                    ext: "pdf",
                    result: Ok(("  \n ", 3)),
                    sparse_ok: false,
                }),
                Box::new(FakeExtractor {
                    name: ocr::TOOL_NAME,
                    ext: "pdf",
                    result: Ok(("짧은 결과", 3)),
                    sparse_ok: true,
                }),
            ],
            MIN_CHARS_PER_PAGE,
        );
        let outcome = chain.run(Path::new("scan.pdf"));
        assert_eq!(outcome.tool, Some(ocr::TOOL_NAME));
        assert!(outcome.is_ocr);
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps[0].outcome.is_err());
    }

    #[test]
    fn all_failed_chain_is_a_clean_outcome() {
        let chain = ExtractionChain::new(
            vec![Box::new(FakeExtractor {
                name: "a",
                ext: "pdf",
                result: Err("boom"),
                sparse_ok: false,
            })],
            MIN_CHARS_PER_PAGE,
        );
        let outcome = chain.run(Path::new("x.pdf"));
        assert!(outcome.text.is_none());
        assert!(!outcome.is_ocr);
        assert_eq!(outcome.steps.len(), 1);
    }

    #[test]
    fn unsupported_extension_records_a_step() {
        let chain = ExtractionChain::new(vec![], MIN_CHARS_PER_PAGE);
        let outcome = chain.run(Path::new("archive.zip"));
        assert!(outcome.text.is_none());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].tool, "none");
    }

    #[test]
    fn attachment_id_is_stable() {
        let a = attachment_id("lh", "r1", "공고문.pdf");
        let b = attachment_id("lh", "r1", "공고문.pdf");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, attachment_id("sh", "r1", "공고문.pdf"));
    }

    #[test]
    fn list_attachments_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.hwp", "ignore.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let files = list_attachments(tmp.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.hwp", "b.pdf"]);
    }
}
