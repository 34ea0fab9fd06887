use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::db::{ItemRow, SourceMapRow};

/// Layout of one crawl date's PARSED output tree.
pub struct ParsedPaths {
    base: PathBuf,
}

impl ParsedPaths {
    pub fn new(out_root: &Path, date: &str) -> Self {
        Self {
            base: out_root.join(date),
        }
    }

    pub fn items_csv(&self) -> PathBuf {
        self.base.join("items.csv")
    }

    pub fn id_map_csv(&self) -> PathBuf {
        self.base.join("id_map.csv")
    }

    pub fn report_json(&self) -> PathBuf {
        self.base.join("report.json")
    }

    pub fn attachments_text_dir(&self) -> PathBuf {
        self.base.join("attachments_text")
    }

    /// Converted PDFs and rendered pages live here for the run.
    pub fn scratch_dir(&self) -> PathBuf {
        self.base.join("tmp")
    }

    pub fn text_path(&self, attachment_id: &str) -> PathBuf {
        self.attachments_text_dir().join(format!("{attachment_id}.txt"))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.attachments_text_dir())?;
        std::fs::create_dir_all(self.scratch_dir())?;
        Ok(())
    }
}

// Canonical export schema consumed by the DB loader and API.
#[derive(Serialize)]
struct ItemCsvRow<'a> {
    item_id: &'a str,
    platform: &'a str,
    addr_std: Option<&'a str>,
    lat: Option<f64>,
    lng: Option<f64>,
    category: Option<&'a str>,
    deposit_krw: Option<i64>,
    rent_krw: Option<i64>,
    area_m2: Option<f64>,
    apply_start: Option<&'a str>,
    apply_end: Option<&'a str>,
    crawled_at: &'a str,
}

/// Rows are sorted by item_id before writing so a re-run on the same
/// input produces a byte-identical file.
pub fn write_items_csv(path: &Path, rows: &[ItemRow]) -> Result<()> {
    let mut sorted: Vec<&ItemRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.item_id.cmp(&b.item_id));

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for r in sorted {
        writer.serialize(ItemCsvRow {
            item_id: &r.item_id,
            platform: &r.platform,
            addr_std: r.addr_std.as_deref(),
            lat: r.lat,
            lng: r.lng,
            category: r.category.as_deref(),
            deposit_krw: r.deposit_krw,
            rent_krw: r.rent_krw,
            area_m2: r.area_m2,
            apply_start: r.apply_start.as_deref(),
            apply_end: r.apply_end.as_deref(),
            crawled_at: &r.crawled_at,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct IdMapCsvRow<'a> {
    item_id: &'a str,
    record_id: &'a str,
    platform: &'a str,
}

/// Mirror of the source_map ledger for this run's records.
pub fn write_id_map_csv(path: &Path, rows: &[SourceMapRow]) -> Result<()> {
    let mut sorted: Vec<&SourceMapRow> = rows.iter().collect();
    sorted.sort_by(|a, b| (&a.item_id, &a.record_id).cmp(&(&b.item_id, &b.record_id)));

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for r in sorted {
        writer.serialize(IdMapCsvRow {
            item_id: &r.item_id,
            record_id: &r.record_id,
            platform: &r.platform,
        })?;
    }
    writer.flush()?;
    Ok(())
}
