use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::normalize::{area, money};

/// A priced sub-offer (specific room/plan) extracted from a record's
/// unit table.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRow {
    pub unit_type: String,
    pub area_m2: Option<f64>,
    pub deposit_krw: Option<i64>,
    pub rent_krw: Option<i64>,
}

// Platforms label unit-table columns inconsistently; first match wins.
const TYPE_KEYS: &[&str] = &["주택형", "타입", "형", "type", "unit_type"];
const AREA_KEYS: &[&str] = &["전용면적", "공급면적", "면적", "area"];
const DEPOSIT_KEYS: &[&str] = &["임대보증금", "보증금", "deposit"];
const RENT_KEYS: &[&str] = &["월임대료", "임대료", "월세", "rent"];

/// Parse one `tables/<rid>_*.json|csv` file into unit rows. Rows missing
/// a recognizable unit type are dropped; numeric parse failures null the
/// field, mirroring field normalization.
pub fn parse_table_file(path: &Path) -> Result<Vec<UnitRow>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "json" => parse_json(path),
        "csv" => parse_csv(path),
        other => anyhow::bail!("unsupported table format `{other}`"),
    }
}

fn parse_json(path: &Path) -> Result<Vec<UnitRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    let rows = match value {
        Value::Array(rows) => rows,
        // Some crawlers wrap the row list: {"rows": [...]}.
        Value::Object(mut map) => match map.remove("rows") {
            Some(Value::Array(rows)) => rows,
            _ => return Ok(Vec::new()),
        },
        _ => return Ok(Vec::new()),
    };

    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(obj) => {
                let map: BTreeMap<String, String> = obj
                    .into_iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k, s)))
                    .collect();
                unit_from_map(&map)
            }
            _ => None,
        })
        .collect())
}

fn parse_csv(path: &Path) -> Result<Vec<UnitRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("reading table headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut units = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(r) => r,
            Err(_) => continue,
        };
        let map: BTreeMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        if let Some(unit) = unit_from_map(&map) {
            units.push(unit);
        }
    }
    Ok(units)
}

fn unit_from_map(map: &BTreeMap<String, String>) -> Option<UnitRow> {
    let unit_type = pick(map, TYPE_KEYS)?;
    let area_m2 = pick(map, AREA_KEYS).and_then(|s| area::parse_area(&s).ok().map(|(v, _)| v));
    let deposit_krw = pick(map, DEPOSIT_KEYS).and_then(|s| money::parse_krw(&s).ok());
    let rent_krw = pick(map, RENT_KEYS).and_then(|s| money::parse_krw(&s).ok());
    Some(UnitRow {
        unit_type,
        area_m2,
        deposit_krw,
        rent_krw,
    })
}

fn pick(map: &BTreeMap<String, String>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = map.get(*key) {
            let v = v.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn scalar_to_string(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
