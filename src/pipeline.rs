use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::SecondsFormat;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::attach::{self, ExtractionChain};
use crate::db;
use crate::dedup::{self, DedupConfig, MergeCandidate};
use crate::error::{NormalizationError, ProvenanceViolation};
use crate::geocode::{self, AddressResolver, GeocodeCache};
use crate::identity;
use crate::normalize::{self, NormalizedFields};
use crate::output::{self, ParsedPaths};
use crate::raw::{self, RawRecord};
use crate::report::QualityReport;
use crate::units;

pub struct RunConfig {
    pub date: String,
    pub raw_root: PathBuf,
    pub out_root: PathBuf,
    pub db_path: PathBuf,
    pub limit: Option<usize>,
    pub jobs: usize,
    pub dedup: DedupConfig,
}

/// Full batch for one crawl date: read → normalize → geocode → identity →
/// merge → extract → upsert → export. Record-level failures degrade and
/// land in the report; only a provenance violation aborts.
pub async fn run_batch(cfg: &RunConfig) -> Result<QualityReport> {
    let conn = db::connect(&cfg.db_path)?;
    db::init_schema(&conn)?;

    let paths = ParsedPaths::new(&cfg.out_root, &cfg.date);
    paths.ensure_dirs()?;

    let mut report = QualityReport::new(&cfg.date);
    let (records, normalized) = read_and_normalize(cfg, &mut report)?;

    // ── Geocode ──
    let mut cache = GeocodeCache::new(db::load_geocode_cache(&conn)?);
    let resolver = Arc::new(AddressResolver::from_env());
    let geo_stats = geocode::resolve_all(
        resolver,
        &mut cache,
        normalized.iter().map(|f| f.addr_norm.clone()),
    )
    .await;
    report.geocode_failed = geo_stats.failed;
    for (addr, reason) in &geo_stats.failures {
        report.example("geocode_failed", format!("{addr}: {reason}"));
    }
    db::save_geocode_cache(&conn, cache.fresh_entries())?;

    // ── Identity + merge ──
    let candidates: Vec<MergeCandidate> = records
        .iter()
        .zip(&normalized)
        .map(|(r, f)| MergeCandidate {
            record_id: r.record_id.clone(),
            platform: r.platform.clone(),
            key: identity::resolve_item_id(&r.platform, &r.extras, f),
            fields: f.clone(),
            crawled_at: r.crawled_at,
        })
        .collect();

    let prior = db::load_assignments(&conn)?;
    let sizes = db::load_cluster_sizes(&conn)?;
    let outcome = dedup::merge(&candidates, &prior, &sizes, &cfg.dedup);
    report.merged_clusters = outcome.merged_clusters;
    report.identity_collisions = outcome.collisions.len();
    for c in &outcome.collisions {
        report.example("identity_collisions", c.to_string());
    }
    info!(
        "{} records → {} canonical items ({} merged, {} collisions)",
        records.len(),
        outcome.groups.len(),
        outcome.merged_clusters,
        outcome.collisions.len()
    );

    // ── Canonical rows ──
    let item_rows: Vec<db::ItemRow> = outcome
        .groups
        .iter()
        .map(|g| {
            let rec = &records[g.representative];
            let f = &normalized[g.representative];
            item_row(&g.item_id, rec, f, &cache)
        })
        .collect();

    let source_rows: Vec<db::SourceMapRow> = outcome
        .assignments()
        .into_iter()
        .map(|(idx, item_id)| db::SourceMapRow {
            item_id: item_id.to_string(),
            record_id: records[idx].record_id.clone(),
            platform: records[idx].platform.as_str().to_string(),
            crawl_date: cfg.date.clone(),
        })
        .collect();

    let mut unit_rows = Vec::new();
    let mut table_rows = Vec::new();
    let mut image_rows = Vec::new();
    for group in &outcome.groups {
        // Freshest member last so its unit figures win the upsert.
        let mut members = group.members.clone();
        members.sort_by_key(|&i| records[i].crawled_at);
        for &idx in &members {
            collect_artifacts(
                &group.item_id,
                &records[idx],
                &mut unit_rows,
                &mut table_rows,
                &mut image_rows,
                &mut report,
            );
        }
    }

    // ── Attachment text ──
    let tasks = attachment_tasks(&records, &outcome);
    let extraction_rows = extract_attachments(tasks, &paths, cfg.jobs, &mut report).await;

    // ── Persist ──
    db::upsert_items(&conn, &item_rows)?;
    db::upsert_units(&conn, &unit_rows)?;
    db::upsert_tables_raw(&conn, &table_rows)?;
    db::upsert_images(&conn, &image_rows)?;
    db::upsert_attachments(&conn, &extraction_rows)?;
    if let Err(e) = db::append_source_map(&conn, &source_rows) {
        if e.downcast_ref::<ProvenanceViolation>().is_some() {
            report.provenance_violations += 1;
            report.example("provenance_violations", e.to_string());
            report.write(&paths.report_json())?;
        }
        return Err(e);
    }

    // ── Export ──
    output::write_items_csv(&paths.items_csv(), &item_rows)?;
    output::write_id_map_csv(&paths.id_map_csv(), &source_rows)?;
    report.write(&paths.report_json())?;

    Ok(report)
}

/// Normalization dry-run: counts only, no writes.
pub fn normalize_only(cfg: &RunConfig) -> Result<QualityReport> {
    let mut report = QualityReport::new(&cfg.date);
    read_and_normalize(cfg, &mut report)?;
    Ok(report)
}

/// Attachment extraction only. Text files already on disk are skipped,
/// so an interrupted run picks up where it left off.
pub async fn extract_only(cfg: &RunConfig) -> Result<QualityReport> {
    let paths = ParsedPaths::new(&cfg.out_root, &cfg.date);
    paths.ensure_dirs()?;

    let mut report = QualityReport::new(&cfg.date);
    let mut records = raw::read_all(&cfg.raw_root, &cfg.date, &mut report)?;
    if let Some(n) = cfg.limit {
        records.truncate(n);
    }
    report.raw_records = records.len();

    // Items are not resolved in this mode; rows are discarded, only the
    // text files and report counters matter.
    let tasks: Vec<(String, AttachmentTask)> = records
        .iter()
        .flat_map(record_attachment_tasks)
        .map(|t| (String::new(), t))
        .collect();
    extract_attachments(tasks, &paths, cfg.jobs, &mut report).await;
    Ok(report)
}

fn read_and_normalize(
    cfg: &RunConfig,
    report: &mut QualityReport,
) -> Result<(Vec<RawRecord>, Vec<NormalizedFields>)> {
    let mut records = raw::read_all(&cfg.raw_root, &cfg.date, report)?;
    if let Some(n) = cfg.limit {
        records.truncate(n);
    }
    report.raw_records = records.len();

    let results: Vec<(NormalizedFields, Vec<NormalizationError>)> = records
        .par_iter()
        .map(|r| {
            let html = r
                .html_path
                .as_ref()
                .and_then(|p| std::fs::read_to_string(p).ok());
            normalize::normalize(r, html.as_deref())
        })
        .collect();

    let mut normalized = Vec::with_capacity(results.len());
    for (record, (fields, errors)) in records.iter().zip(results) {
        if errors.is_empty() {
            report.parsed_ok += 1;
        } else {
            report.normalization_failed += 1;
            for e in &errors {
                report.example(
                    "normalization_failed",
                    format!("{}/{}: {}", record.platform, record.record_id, e),
                );
            }
        }
        normalized.push(fields);
    }
    Ok((records, normalized))
}

fn item_row(
    item_id: &str,
    rec: &RawRecord,
    f: &NormalizedFields,
    cache: &GeocodeCache,
) -> db::ItemRow {
    let geo = cache.get(&f.addr_norm);
    db::ItemRow {
        item_id: item_id.to_string(),
        platform: rec.platform.as_str().to_string(),
        title: f.title.clone(),
        addr_raw: f.address_raw.clone(),
        addr_std: geo.map(|g| g.addr_std.clone()),
        lat: geo.map(|g| g.lat),
        lng: geo.map(|g| g.lng),
        category: f.category.clone(),
        deposit_krw: f.deposit_krw,
        deposit_raw: f.deposit_raw.clone(),
        rent_krw: f.rent_krw,
        rent_raw: f.rent_raw.clone(),
        area_m2: f.area_m2,
        area_unit: f.area_unit.map(|u| u.as_str().to_string()),
        area_raw: f.area_raw.clone(),
        apply_start: f.apply_start.map(|d| d.to_string()),
        apply_end: f.apply_end.map(|d| d.to_string()),
        crawled_at: rec.crawled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

fn collect_artifacts(
    item_id: &str,
    rec: &RawRecord,
    unit_rows: &mut Vec<db::UnitUpsert>,
    table_rows: &mut Vec<db::TableRawUpsert>,
    image_rows: &mut Vec<db::ImageUpsert>,
    report: &mut QualityReport,
) {
    for table_path in &rec.table_paths {
        table_rows.push(db::TableRawUpsert {
            item_id: item_id.to_string(),
            record_id: rec.record_id.clone(),
            file_path: table_path.display().to_string(),
            kind: table_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string(),
        });
        match units::parse_table_file(table_path) {
            Ok(parsed) => unit_rows.extend(parsed.into_iter().map(|u| db::UnitUpsert {
                item_id: item_id.to_string(),
                unit_type: u.unit_type,
                area_m2: u.area_m2,
                deposit_krw: u.deposit_krw,
                rent_krw: u.rent_krw,
            })),
            Err(e) => {
                warn!("table parse failed for {}: {e}", table_path.display());
                report.example("table_parse_failed", format!("{}: {e}", table_path.display()));
            }
        }
    }

    for image_path in &rec.image_paths {
        let name = image_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        image_rows.push(db::ImageUpsert {
            item_id: item_id.to_string(),
            record_id: rec.record_id.clone(),
            file_path: image_path.display().to_string(),
            role: image_role(&name).to_string(),
        });
    }
}

fn image_role(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.contains("평면") || lower.contains("floorplan") || lower.contains("floor_plan") {
        "floorplan"
    } else {
        "photo"
    }
}

// ── Attachment extraction pool ──

struct AttachmentTask {
    attachment_id: String,
    record_id: String,
    file_path: PathBuf,
}

fn record_attachment_tasks(rec: &RawRecord) -> Vec<AttachmentTask> {
    let Some(dir) = rec.attachments_dir.as_ref() else {
        return Vec::new();
    };
    attach::list_attachments(dir)
        .into_iter()
        .map(|file_path| {
            let name = file_path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            AttachmentTask {
                attachment_id: attach::attachment_id(rec.platform.as_str(), &rec.record_id, &name),
                record_id: rec.record_id.clone(),
                file_path,
            }
        })
        .collect()
}

fn attachment_tasks(records: &[RawRecord], outcome: &dedup::MergeOutcome) -> Vec<(String, AttachmentTask)> {
    let mut by_index = vec![""; records.len()];
    for (idx, item_id) in outcome.assignments() {
        by_index[idx] = item_id;
    }
    records
        .iter()
        .enumerate()
        .flat_map(|(idx, rec)| {
            let item_id = by_index[idx].to_string();
            record_attachment_tasks(rec)
                .into_iter()
                .map(move |t| (item_id.clone(), t))
        })
        .collect()
}

struct ExtractionResult {
    task: AttachmentTask,
    text_path: Option<PathBuf>,
    is_ocr: bool,
    tool: Option<String>,
    elapsed_ms: Option<i64>,
    failure: Option<String>,
    reused: bool,
}

/// Bounded worker pool over the fallback chain. Subprocess-heavy, so the
/// chain runs on blocking threads and results stream back as they land.
async fn extract_attachments(
    tasks: Vec<(String, AttachmentTask)>,
    paths: &ParsedPaths,
    jobs: usize,
    report: &mut QualityReport,
) -> Vec<db::AttachmentUpsert> {
    if tasks.is_empty() {
        return Vec::new();
    }

    let chain = Arc::new(ExtractionChain::standard(paths.scratch_dir()));
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, ExtractionResult)>(jobs.max(1) * 2);

    let pb = ProgressBar::new(tasks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .expect("static template")
            .progress_chars("=> "),
    );

    let total = tasks.len();
    for (item_id, task) in tasks {
        let text_path = paths.text_path(&task.attachment_id);
        let chain = Arc::clone(&chain);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let result = tokio::task::spawn_blocking(move || extract_one(&chain, task, text_path))
                .await
                .expect("extraction worker panicked");
            let _ = tx.send((item_id, result)).await;
        });
    }
    drop(tx);

    let mut rows = Vec::with_capacity(total);
    let mut reused = 0usize;
    while let Some((item_id, result)) = rx.recv().await {
        if result.reused {
            reused += 1;
        }
        if result.is_ocr {
            report.ocr_fallback_used += 1;
        }
        if let Some(reason) = &result.failure {
            report.extraction_failed += 1;
            report.example(
                "extraction_failed",
                format!("{}: {}", result.task.file_path.display(), reason),
            );
        }
        rows.push(db::AttachmentUpsert {
            attachment_id: result.task.attachment_id,
            item_id,
            record_id: result.task.record_id,
            file_path: result.task.file_path.display().to_string(),
            role: "document".to_string(),
            text_path: result.text_path.map(|p| p.display().to_string()),
            is_ocr: result.is_ocr,
            extract_tool: result.tool,
            extract_ms: result.elapsed_ms,
        });
        pb.inc(1);
    }
    pb.finish_and_clear();
    info!(
        "extracted {} attachments ({} reused, {} failed, {} via OCR)",
        total, reused, report.extraction_failed, report.ocr_fallback_used
    );
    rows
}

fn extract_one(chain: &ExtractionChain, task: AttachmentTask, text_path: PathBuf) -> ExtractionResult {
    // Resume support: text already extracted in an earlier run.
    if text_path.exists() {
        return ExtractionResult {
            task,
            text_path: Some(text_path),
            is_ocr: false,
            tool: None,
            elapsed_ms: None,
            failure: None,
            reused: true,
        };
    }

    let outcome = chain.run(&task.file_path);
    let elapsed_ms = Some(outcome.total_ms() as i64);
    match outcome.text {
        Some(text) => match std::fs::write(&text_path, text) {
            Ok(()) => ExtractionResult {
                task,
                text_path: Some(text_path),
                is_ocr: outcome.is_ocr,
                tool: outcome.tool.map(str::to_string),
                elapsed_ms,
                failure: None,
                reused: false,
            },
            Err(e) => ExtractionResult {
                task,
                text_path: None,
                is_ocr: false,
                tool: outcome.tool.map(str::to_string),
                elapsed_ms,
                failure: Some(format!("writing text file: {e}")),
                reused: false,
            },
        },
        None => {
            let detail = outcome
                .steps
                .iter()
                .map(|s| match &s.outcome {
                    Ok(()) => format!("{} ok", s.tool),
                    Err(e) => format!("{}: {}", s.tool, e),
                })
                .collect::<Vec<_>>()
                .join("; ");
            ExtractionResult {
                task,
                text_path: None,
                is_ocr: false,
                tool: None,
                elapsed_ms,
                failure: Some(detail),
                reused: false,
            }
        }
    }
}
