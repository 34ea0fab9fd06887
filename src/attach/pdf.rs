use std::path::Path;

use crate::error::ExtractionError;

use super::{ExtractedText, Extractor};

/// Native PDF text layer via `pdf-extract`. Page boundaries come out as
/// form feeds, which is all we need for the per-page density heuristic.
pub struct PdfTextExtractor;

impl Extractor for PdfTextExtractor {
    fn name(&self) -> &'static str {
        "pdf_text"
    }

    fn supports(&self, ext: &str) -> bool {
        ext == "pdf"
    }

    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractionError> {
        extract_pdf_text(path)
    }
}

pub(super) fn extract_pdf_text(path: &Path) -> Result<ExtractedText, ExtractionError> {
    let text = pdf_extract::extract_text(path).map_err(|e| ExtractionError::Tool {
        tool: "pdf_text",
        detail: e.to_string(),
    })?;
    let pages = text.matches('\x0c').count().max(1);
    Ok(ExtractedText { text, pages })
}
