use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How many representative examples to keep per failure class.
const MAX_EXAMPLES: usize = 5;

/// Cross-cutting quality ledger for one batch run. Every stage reports
/// its outcome here; the serialized form is the run's `report.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub crawl_date: String,
    pub raw_records: usize,
    pub malformed_rows: usize,
    pub parsed_ok: usize,
    pub normalization_failed: usize,
    pub geocode_failed: usize,
    pub extraction_failed: usize,
    pub ocr_fallback_used: usize,
    pub merged_clusters: usize,
    pub identity_collisions: usize,
    pub provenance_violations: usize,
    pub examples: BTreeMap<String, Vec<String>>,
}

impl QualityReport {
    pub fn new(crawl_date: &str) -> Self {
        Self {
            crawl_date: crawl_date.to_string(),
            ..Self::default()
        }
    }

    /// Keep a representative example for a failure class, capped so the
    /// report stays readable.
    pub fn example(&mut self, class: &str, message: String) {
        let bucket = self.examples.entry(class.to_string()).or_default();
        if bucket.len() < MAX_EXAMPLES {
            bucket.push(message);
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("no report at {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn print(&self) {
        println!("Crawl date:            {}", self.crawl_date);
        println!("Raw records:           {}", self.raw_records);
        println!("Parsed ok:             {}", self.parsed_ok);
        println!("Malformed rows:        {}", self.malformed_rows);
        println!("Normalization failed:  {}", self.normalization_failed);
        println!("Geocode failed:        {}", self.geocode_failed);
        println!("Extraction failed:     {}", self.extraction_failed);
        println!("OCR fallbacks:         {}", self.ocr_fallback_used);
        println!("Merged clusters:       {}", self.merged_clusters);
        println!("Identity collisions:   {}", self.identity_collisions);
        println!("Provenance violations: {}", self.provenance_violations);
        for (class, examples) in &self.examples {
            println!("\n--- {class} ---");
            for e in examples {
                println!("  {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn examples_are_capped() {
        let mut report = QualityReport::new("2025-11-02");
        for i in 0..10 {
            report.example("normalization_failed", format!("record r{i}"));
        }
        assert_eq!(report.examples["normalization_failed"].len(), MAX_EXAMPLES);
    }

    #[test]
    fn round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.json");

        let mut report = QualityReport::new("2025-11-02");
        report.parsed_ok = 7;
        report.merged_clusters = 2;
        report.example("geocode_failed", "주소 불명".to_string());
        report.write(&path).unwrap();

        let loaded = QualityReport::read(&path).unwrap();
        assert_eq!(loaded.parsed_ok, 7);
        assert_eq!(loaded.merged_clusters, 2);
        assert_eq!(loaded.examples["geocode_failed"].len(), 1);
    }
}
