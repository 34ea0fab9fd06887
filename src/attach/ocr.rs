use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ExtractionError;

use super::{extension_of, office, run_tool, short_hash, ExtractedText, Extractor};

pub const TOOL_NAME: &str = "ocr";

const OCR_DPI: u32 = 200;
const MAX_OCR_PAGES: u32 = 20;
const OCR_LANGS: &str = "kor+eng";

/// Scanned-document fallback: render pages with `pdftoppm`, read them
/// with `tesseract`. Non-PDF inputs go through the office conversion
/// first (the converted file is cached in scratch, so a preceding chain
/// step has usually already paid for it).
pub struct OcrExtractor {
    scratch: PathBuf,
}

impl OcrExtractor {
    pub fn new(scratch: PathBuf) -> Self {
        Self { scratch }
    }
}

impl Extractor for OcrExtractor {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn supports(&self, ext: &str) -> bool {
        ext == "pdf" || office::OFFICE_EXTS.contains(&ext)
    }

    fn accepts_sparse_output(&self) -> bool {
        true
    }

    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractionError> {
        let pdf_path = if extension_of(path) == "pdf" {
            path.to_path_buf()
        } else {
            office::to_pdf(path, &self.scratch)?
        };

        let pages = self.render_pages(&pdf_path)?;
        if pages.is_empty() {
            return Err(ExtractionError::Tool {
                tool: "pdftoppm",
                detail: "no pages rendered".into(),
            });
        }

        let mut text = String::new();
        for page in &pages {
            let output = run_tool(
                "tesseract",
                Command::new("tesseract")
                    .arg(page)
                    .arg("stdout")
                    .arg("-l")
                    .arg(OCR_LANGS),
            )?;
            text.push_str(&String::from_utf8_lossy(&output.stdout));
            text.push('\n');
        }
        Ok(ExtractedText {
            text,
            pages: pages.len(),
        })
    }
}

impl OcrExtractor {
    fn render_pages(&self, pdf_path: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
        let out_dir = self.scratch.join(format!("{}-pages", short_hash(pdf_path)));
        std::fs::create_dir_all(&out_dir)?;
        let prefix = out_dir.join("page");

        run_tool(
            "pdftoppm",
            Command::new("pdftoppm")
                .arg("-r")
                .arg(OCR_DPI.to_string())
                .arg("-png")
                .arg("-f")
                .arg("1")
                .arg("-l")
                .arg(MAX_OCR_PAGES.to_string())
                .arg(pdf_path)
                .arg(&prefix),
        )?;

        let mut pages: Vec<PathBuf> = std::fs::read_dir(&out_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| extension_of(p) == "png")
            .collect();
        pages.sort();
        Ok(pages)
    }
}
