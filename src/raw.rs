use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::extras::{Platform, PlatformExtras};
use crate::report::QualityReport;

/// One row of a platform's RAW manifest, with artifact paths resolved
/// against the platform directory. Immutable crawler output.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub record_id: String,
    pub platform: Platform,
    pub title: String,
    pub address: String,
    pub html_path: Option<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    pub attachments_dir: Option<PathBuf>,
    pub table_paths: Vec<PathBuf>,
    pub extras: PlatformExtras,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    record_id: String,
    platform: String,
    #[serde(alias = "house_name")]
    title: String,
    address: String,
    #[serde(default)]
    #[allow(dead_code)]
    list_url: String,
    #[serde(default)]
    #[allow(dead_code)]
    detail_url: String,
    #[serde(default)]
    #[allow(dead_code)]
    detail_descriptor: String,
    #[serde(default)]
    image_paths: String,
    #[serde(default)]
    html_path: String,
    #[serde(default)]
    extras_json: String,
    crawled_at: String,
}

/// Read every platform manifest under `raw_root/<date>/`. Malformed rows
/// are counted and skipped; a missing platform manifest skips that
/// platform; only a missing date directory is fatal.
pub fn read_all(raw_root: &Path, date: &str, report: &mut QualityReport) -> Result<Vec<RawRecord>> {
    let date_dir = raw_root.join(date);
    let mut platforms: Vec<PathBuf> = std::fs::read_dir(&date_dir)
        .with_context(|| format!("no RAW tree at {}", date_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    platforms.sort();

    let mut records = Vec::new();
    for platform_dir in platforms {
        let name = platform_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let manifest = platform_dir.join("raw.csv");
        if !manifest.exists() {
            warn!("platform `{}` has no raw.csv, skipping", name);
            continue;
        }
        read_manifest(&manifest, &Platform::parse(&name), &platform_dir, &mut records, report)?;
    }
    Ok(records)
}

fn read_manifest(
    manifest: &Path,
    platform: &Platform,
    base: &Path,
    records: &mut Vec<RawRecord>,
    report: &mut QualityReport,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(manifest)
        .with_context(|| format!("opening {}", manifest.display()))?;

    for row in reader.deserialize::<ManifestRow>() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                report.malformed_rows += 1;
                report.example("malformed_rows", format!("{}: {}", manifest.display(), e));
                continue;
            }
        };
        match resolve_row(row, platform, base) {
            Ok(record) => records.push(record),
            Err(e) => {
                report.malformed_rows += 1;
                report.example("malformed_rows", format!("{}: {}", manifest.display(), e));
            }
        }
    }
    Ok(())
}

fn resolve_row(row: ManifestRow, platform: &Platform, base: &Path) -> Result<RawRecord> {
    if row.record_id.is_empty() {
        anyhow::bail!("empty record_id");
    }
    // A manifest row's platform column must agree with its directory.
    let row_platform = Platform::parse(&row.platform);
    if row_platform != *platform {
        anyhow::bail!(
            "record {} claims platform `{}` inside `{}` directory",
            row.record_id,
            row.platform,
            platform
        );
    }

    let crawled_at = parse_crawled_at(&row.crawled_at)
        .with_context(|| format!("record {}: bad crawled_at `{}`", row.record_id, row.crawled_at))?;

    let html_path = non_empty(&row.html_path).map(|p| base.join(p)).filter(|p| p.exists());

    let image_paths: Vec<PathBuf> = row
        .image_paths
        .split(';')
        .filter_map(non_empty)
        .map(|p| base.join(p))
        .collect();

    let attachments_dir = Some(base.join("attachments").join(&row.record_id)).filter(|p| p.is_dir());
    let table_paths = list_tables(base, &row.record_id);

    Ok(RawRecord {
        platform: row_platform,
        extras: PlatformExtras::parse(platform, &row.extras_json),
        title: row.title,
        address: row.address,
        html_path,
        image_paths,
        attachments_dir,
        table_paths,
        record_id: row.record_id,
        crawled_at,
    })
}

/// Table files follow the `tables/<rid>_*.json|csv` naming convention.
fn list_tables(base: &Path, record_id: &str) -> Vec<PathBuf> {
    let tables_dir = base.join("tables");
    let prefix = format!("{record_id}_");
    let mut found: Vec<PathBuf> = match std::fs::read_dir(&tables_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
                name.starts_with(&prefix)
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("json") | Some("csv")
                    )
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    found.sort();
    found
}

fn parse_crawled_at(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    anyhow::bail!("unrecognized timestamp format")
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "record_id,platform,title,address,list_url,detail_url,detail_descriptor,image_paths,html_path,extras_json,crawled_at\n";

    fn write_manifest(dir: &Path, platform: &str, rows: &str) {
        let pdir = dir.join(platform);
        std::fs::create_dir_all(&pdir).unwrap();
        std::fs::write(pdir.join("raw.csv"), format!("{HEADER}{rows}")).unwrap();
    }

    #[test]
    fn reads_rows_and_resolves_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let date_dir = tmp.path().join("2025-11-02");
        write_manifest(
            &date_dir,
            "lh",
            "r1,lh,행복주택 모집공고,서울특별시 강동구 고덕동 123,,https://lh.example/1,,img/a.jpg;img/b.jpg,,\"{\"\"panId\"\": 20000569}\",2025-11-02 03:00:00\n",
        );
        std::fs::create_dir_all(date_dir.join("lh/attachments/r1")).unwrap();

        let mut report = QualityReport::new("2025-11-02");
        let records = read_all(tmp.path(), "2025-11-02", &mut report).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.record_id, "r1");
        assert_eq!(r.platform, Platform::Lh);
        assert_eq!(r.extras.native_key(), Some("20000569"));
        assert_eq!(r.image_paths.len(), 2);
        assert!(r.attachments_dir.is_some());
        assert_eq!(report.malformed_rows, 0);
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let date_dir = tmp.path().join("2025-11-02");
        write_manifest(
            &date_dir,
            "sh",
            ",sh,제목없음,주소,,,,,,{},2025-11-02 03:00:00\n\
             r2,sh,멀쩡한 공고,서울특별시 구로구 오류동 1,,,,,,{},2025-11-02 03:00:00\n",
        );

        let mut report = QualityReport::new("2025-11-02");
        let records = read_all(tmp.path(), "2025-11-02", &mut report).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "r2");
        assert_eq!(report.malformed_rows, 1);
    }

    #[test]
    fn platform_mismatch_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let date_dir = tmp.path().join("2025-11-02");
        write_manifest(
            &date_dir,
            "gh",
            "r1,lh,공고,주소,,,,,,{},2025-11-02 03:00:00\n",
        );

        let mut report = QualityReport::new("2025-11-02");
        let records = read_all(tmp.path(), "2025-11-02", &mut report).unwrap();
        assert!(records.is_empty());
        assert_eq!(report.malformed_rows, 1);
    }

    #[test]
    fn missing_date_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = QualityReport::new("2025-11-02");
        assert!(read_all(tmp.path(), "2025-11-02", &mut report).is_err());
    }
}
