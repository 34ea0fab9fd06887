use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::error::ExtractionError;

use super::{pdf, run_tool, short_hash, ExtractedText, Extractor};

pub const OFFICE_EXTS: &[&str] = &["hwp", "hwpx", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1_000;

/// HWP/HWPX and legacy Office formats: convert to PDF with a headless
/// LibreOffice, then read the PDF text layer.
pub struct OfficeConvertExtractor {
    scratch: PathBuf,
}

impl OfficeConvertExtractor {
    pub fn new(scratch: PathBuf) -> Self {
        Self { scratch }
    }
}

impl Extractor for OfficeConvertExtractor {
    fn name(&self) -> &'static str {
        "office_convert"
    }

    fn supports(&self, ext: &str) -> bool {
        OFFICE_EXTS.contains(&ext)
    }

    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractionError> {
        let converted = to_pdf(path, &self.scratch)?;
        pdf::extract_pdf_text(&converted)
    }
}

/// Convert a document to PDF under `scratch`, reusing an earlier
/// conversion of the same file. Conversion is the flaky step of the
/// chain, so it gets the bounded retry treatment.
pub fn to_pdf(path: &Path, scratch: &Path) -> Result<PathBuf, ExtractionError> {
    let out_dir = scratch.join(short_hash(path));
    std::fs::create_dir_all(&out_dir)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| ExtractionError::Unsupported(path.display().to_string()))?;
    let expected = out_dir.join(format!("{stem}.pdf"));
    if expected.exists() {
        return Ok(expected);
    }

    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
            debug!("soffice retry {}/{} for {}", attempt + 1, MAX_RETRIES, path.display());
            std::thread::sleep(backoff);
        }
        let result = run_tool(
            "soffice",
            Command::new("soffice")
                .arg("--headless")
                .arg("--norestore")
                .arg("--convert-to")
                .arg("pdf")
                .arg("--outdir")
                .arg(&out_dir)
                .arg(path),
        );
        match result {
            Ok(_) if expected.exists() => return Ok(expected),
            Ok(_) => {
                last_err = Some(ExtractionError::Tool {
                    tool: "soffice",
                    detail: "conversion produced no output file".into(),
                });
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or(ExtractionError::AllStepsFailed))
}
