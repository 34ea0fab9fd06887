use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::error::ProvenanceViolation;
use crate::geocode::Geocoded;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            item_id       TEXT PRIMARY KEY,
            platform      TEXT NOT NULL,
            title         TEXT,
            addr_raw      TEXT,
            addr_std      TEXT,
            lat           REAL,
            lng           REAL,
            category      TEXT,
            deposit_krw   INTEGER,
            deposit_raw   TEXT,
            rent_krw      INTEGER,
            rent_raw      TEXT,
            area_m2       REAL,
            area_unit     TEXT,
            area_raw      TEXT,
            apply_start   TEXT,
            apply_end     TEXT,
            crawled_at    TEXT NOT NULL,
            first_seen_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_items_platform ON items(platform);
        CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);

        CREATE TABLE IF NOT EXISTS units (
            id          INTEGER PRIMARY KEY,
            item_id     TEXT NOT NULL REFERENCES items(item_id),
            unit_type   TEXT NOT NULL,
            area_m2     REAL,
            deposit_krw INTEGER,
            rent_krw    INTEGER,
            UNIQUE(item_id, unit_type)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            attachment_id TEXT PRIMARY KEY,
            item_id       TEXT NOT NULL REFERENCES items(item_id),
            record_id     TEXT NOT NULL,
            file_path     TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'document',
            text_path     TEXT,
            is_ocr        INTEGER NOT NULL DEFAULT 0,
            extract_tool  TEXT,
            extract_ms    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_item ON attachments(item_id);

        CREATE TABLE IF NOT EXISTS images (
            id        INTEGER PRIMARY KEY,
            item_id   TEXT NOT NULL REFERENCES items(item_id),
            record_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            role      TEXT NOT NULL DEFAULT 'photo',
            UNIQUE(item_id, file_path)
        );

        CREATE TABLE IF NOT EXISTS tables_raw (
            id        INTEGER PRIMARY KEY,
            item_id   TEXT NOT NULL REFERENCES items(item_id),
            record_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            kind      TEXT,
            UNIQUE(item_id, file_path)
        );

        CREATE TABLE IF NOT EXISTS source_map (
            item_id    TEXT NOT NULL,
            record_id  TEXT NOT NULL,
            platform   TEXT NOT NULL,
            crawl_date TEXT,
            added_at   TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (item_id, record_id)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_source_map_record
            ON source_map(platform, record_id);

        CREATE TABLE IF NOT EXISTS geocode_cache (
            addr_norm   TEXT PRIMARY KEY,
            addr_std    TEXT NOT NULL,
            lat         REAL NOT NULL,
            lng         REAL NOT NULL,
            resolved_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Items ──

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub item_id: String,
    pub platform: String,
    pub title: String,
    pub addr_raw: String,
    pub addr_std: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub category: Option<String>,
    pub deposit_krw: Option<i64>,
    pub deposit_raw: Option<String>,
    pub rent_krw: Option<i64>,
    pub rent_raw: Option<String>,
    pub area_m2: Option<f64>,
    pub area_unit: Option<String>,
    pub area_raw: Option<String>,
    pub apply_start: Option<String>,
    pub apply_end: Option<String>,
    pub crawled_at: String,
}

/// Keyed upsert: fields refresh, identity and first_seen_at never move.
pub fn upsert_items(conn: &Connection, rows: &[ItemRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO items
             (item_id, platform, title, addr_raw, addr_std, lat, lng, category,
              deposit_krw, deposit_raw, rent_krw, rent_raw, area_m2, area_unit,
              area_raw, apply_start, apply_end, crawled_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
             ON CONFLICT(item_id) DO UPDATE SET
                platform = excluded.platform,
                title = excluded.title,
                addr_raw = excluded.addr_raw,
                addr_std = COALESCE(excluded.addr_std, items.addr_std),
                lat = COALESCE(excluded.lat, items.lat),
                lng = COALESCE(excluded.lng, items.lng),
                category = COALESCE(excluded.category, items.category),
                deposit_krw = excluded.deposit_krw,
                deposit_raw = excluded.deposit_raw,
                rent_krw = excluded.rent_krw,
                rent_raw = excluded.rent_raw,
                area_m2 = excluded.area_m2,
                area_unit = excluded.area_unit,
                area_raw = excluded.area_raw,
                apply_start = excluded.apply_start,
                apply_end = excluded.apply_end,
                crawled_at = excluded.crawled_at,
                updated_at = datetime('now')",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.item_id,
                r.platform,
                r.title,
                r.addr_raw,
                r.addr_std,
                r.lat,
                r.lng,
                r.category,
                r.deposit_krw,
                r.deposit_raw,
                r.rent_krw,
                r.rent_raw,
                r.area_m2,
                r.area_unit,
                r.area_raw,
                r.apply_start,
                r.apply_end,
                r.crawled_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Units ──

pub struct UnitUpsert {
    pub item_id: String,
    pub unit_type: String,
    pub area_m2: Option<f64>,
    pub deposit_krw: Option<i64>,
    pub rent_krw: Option<i64>,
}

pub fn upsert_units(conn: &Connection, rows: &[UnitUpsert]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO units (item_id, unit_type, area_m2, deposit_krw, rent_krw)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(item_id, unit_type) DO UPDATE SET
                area_m2 = excluded.area_m2,
                deposit_krw = excluded.deposit_krw,
                rent_krw = excluded.rent_krw",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.item_id,
                r.unit_type,
                r.area_m2,
                r.deposit_krw,
                r.rent_krw,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Attachments / images / raw tables ──

pub struct AttachmentUpsert {
    pub attachment_id: String,
    pub item_id: String,
    pub record_id: String,
    pub file_path: String,
    pub role: String,
    pub text_path: Option<String>,
    pub is_ocr: bool,
    pub extract_tool: Option<String>,
    pub extract_ms: Option<i64>,
}

pub fn upsert_attachments(conn: &Connection, rows: &[AttachmentUpsert]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO attachments
             (attachment_id, item_id, record_id, file_path, role, text_path,
              is_ocr, extract_tool, extract_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(attachment_id) DO UPDATE SET
                item_id = excluded.item_id,
                text_path = COALESCE(excluded.text_path, attachments.text_path),
                is_ocr = CASE WHEN excluded.extract_tool IS NOT NULL
                              THEN excluded.is_ocr ELSE attachments.is_ocr END,
                extract_tool = COALESCE(excluded.extract_tool, attachments.extract_tool),
                extract_ms = COALESCE(excluded.extract_ms, attachments.extract_ms)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.attachment_id,
                r.item_id,
                r.record_id,
                r.file_path,
                r.role,
                r.text_path,
                r.is_ocr,
                r.extract_tool,
                r.extract_ms,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub struct ImageUpsert {
    pub item_id: String,
    pub record_id: String,
    pub file_path: String,
    pub role: String,
}

pub fn upsert_images(conn: &Connection, rows: &[ImageUpsert]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO images (item_id, record_id, file_path, role)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(item_id, file_path) DO UPDATE SET role = excluded.role",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![r.item_id, r.record_id, r.file_path, r.role])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub struct TableRawUpsert {
    pub item_id: String,
    pub record_id: String,
    pub file_path: String,
    pub kind: String,
}

pub fn upsert_tables_raw(conn: &Connection, rows: &[TableRawUpsert]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tables_raw (item_id, record_id, file_path, kind)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(item_id, file_path) DO NOTHING",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![r.item_id, r.record_id, r.file_path, r.kind])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Source map (provenance ledger) ──

pub struct SourceMapRow {
    pub item_id: String,
    pub record_id: String,
    pub platform: String,
    pub crawl_date: String,
}

/// Every record's historical assignment, keyed by (platform, record_id).
pub fn load_assignments(conn: &Connection) -> Result<HashMap<(String, String), String>> {
    let mut stmt = conn.prepare("SELECT platform, record_id, item_id FROM source_map")?;
    let rows = stmt
        .query_map([], |row| Ok(((row.get(0)?, row.get(1)?), row.get(2)?)))?
        .collect::<std::result::Result<HashMap<(String, String), String>, _>>()?;
    Ok(rows)
}

/// Provenance rows per item, for the largest-cluster tie-break.
pub fn load_cluster_sizes(conn: &Connection) -> Result<HashMap<String, usize>> {
    let mut stmt = conn.prepare("SELECT item_id, COUNT(*) FROM source_map GROUP BY item_id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<std::result::Result<HashMap<String, usize>, _>>()?;
    Ok(rows)
}

pub fn source_map_len(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM source_map", [], |r| r.get(0))?;
    Ok(n as usize)
}

/// Append-only upsert into the provenance ledger.
///
/// A row that disagrees with an existing assignment is a programming
/// invariant breach, not data: the batch must stop rather than rewrite
/// history. The ledger is also re-counted afterwards so a shrink can
/// never slip through silently.
pub fn append_source_map(conn: &Connection, rows: &[SourceMapRow]) -> Result<()> {
    let before = source_map_len(conn)?;
    let assignments = load_assignments(conn)?;

    for r in rows {
        let key = (r.platform.clone(), r.record_id.clone());
        if let Some(assigned) = assignments.get(&key) {
            if *assigned != r.item_id {
                return Err(ProvenanceViolation::ItemIdMutation {
                    record_id: r.record_id.clone(),
                    assigned: assigned.clone(),
                    attempted: r.item_id.clone(),
                }
                .into());
            }
        }
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO source_map (item_id, record_id, platform, crawl_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(item_id, record_id) DO NOTHING",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.item_id,
                r.record_id,
                r.platform,
                r.crawl_date
            ])?;
        }
    }
    tx.commit()?;

    let after = source_map_len(conn)?;
    if after < before {
        return Err(ProvenanceViolation::RowRemoval { before, after }.into());
    }
    Ok(())
}

// ── Geocode cache ──

pub fn load_geocode_cache(conn: &Connection) -> Result<HashMap<String, Geocoded>> {
    let mut stmt = conn.prepare("SELECT addr_norm, addr_std, lat, lng FROM geocode_cache")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Geocoded {
                    addr_std: row.get(1)?,
                    lat: row.get(2)?,
                    lng: row.get(3)?,
                },
            ))
        })?
        .collect::<std::result::Result<HashMap<String, Geocoded>, _>>()?;
    Ok(rows)
}

pub fn save_geocode_cache<'a>(
    conn: &Connection,
    entries: impl Iterator<Item = (&'a str, &'a Geocoded)>,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO geocode_cache (addr_norm, addr_std, lat, lng)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(addr_norm) DO UPDATE SET
                addr_std = excluded.addr_std,
                lat = excluded.lat,
                lng = excluded.lng,
                resolved_at = datetime('now')",
        )?;
        for (addr_norm, g) in entries {
            stmt.execute(rusqlite::params![addr_norm, g.addr_std, g.lat, g.lng])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub items: usize,
    pub units: usize,
    pub attachments: usize,
    pub attachments_with_text: usize,
    pub ocr_attachments: usize,
    pub images: usize,
    pub source_map_rows: usize,
    pub geocode_cache_entries: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> {
        let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        Ok(n as usize)
    };
    Ok(Stats {
        items: count("SELECT COUNT(*) FROM items")?,
        units: count("SELECT COUNT(*) FROM units")?,
        attachments: count("SELECT COUNT(*) FROM attachments")?,
        attachments_with_text: count(
            "SELECT COUNT(*) FROM attachments WHERE text_path IS NOT NULL",
        )?,
        ocr_attachments: count("SELECT COUNT(*) FROM attachments WHERE is_ocr = 1")?,
        images: count("SELECT COUNT(*) FROM images")?,
        source_map_rows: count("SELECT COUNT(*) FROM source_map")?,
        geocode_cache_entries: count("SELECT COUNT(*) FROM geocode_cache")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn item(item_id: &str) -> ItemRow {
        ItemRow {
            item_id: item_id.into(),
            platform: "lh".into(),
            title: "행복주택 모집공고".into(),
            addr_raw: "서울특별시 강동구 고덕동 123".into(),
            addr_std: None,
            lat: None,
            lng: None,
            category: Some("행복주택".into()),
            deposit_krw: Some(15_000_000),
            deposit_raw: Some("1천5백만원".into()),
            rent_krw: Some(500_000),
            rent_raw: Some("50만원".into()),
            area_m2: Some(28.49),
            area_unit: Some("m2".into()),
            area_raw: Some("28.49㎡".into()),
            apply_start: Some("2024-03-01".into()),
            apply_end: Some("2024-03-15".into()),
            crawled_at: "2025-11-02T03:00:00Z".into(),
        }
    }

    #[test]
    fn item_upsert_is_idempotent() {
        let conn = test_conn();
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        assert_eq!(get_stats(&conn).unwrap().items, 1);
    }

    #[test]
    fn item_update_keeps_enriched_geocode() {
        let conn = test_conn();
        let mut first = item("lh:1");
        first.addr_std = Some("서울 강동구 고덕동".into());
        first.lat = Some(37.55);
        first.lng = Some(127.15);
        upsert_items(&conn, &[first]).unwrap();

        // A later run without geocode results must not wipe coordinates.
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        let (addr_std, lat): (Option<String>, Option<f64>) = conn
            .query_row(
                "SELECT addr_std, lat FROM items WHERE item_id = 'lh:1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(addr_std.as_deref(), Some("서울 강동구 고덕동"));
        assert_eq!(lat, Some(37.55));
    }

    #[test]
    fn source_map_is_append_only() {
        let conn = test_conn();
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        let row = || SourceMapRow {
            item_id: "lh:1".into(),
            record_id: "r1".into(),
            platform: "lh".into(),
            crawl_date: "2025-11-02".into(),
        };
        append_source_map(&conn, &[row()]).unwrap();
        append_source_map(&conn, &[row()]).unwrap();
        assert_eq!(source_map_len(&conn).unwrap(), 1);
    }

    #[test]
    fn item_id_mutation_is_a_provenance_violation() {
        let conn = test_conn();
        upsert_items(&conn, &[item("lh:1"), item("lh:2")]).unwrap();
        append_source_map(
            &conn,
            &[SourceMapRow {
                item_id: "lh:1".into(),
                record_id: "r1".into(),
                platform: "lh".into(),
                crawl_date: "2025-11-02".into(),
            }],
        )
        .unwrap();

        let err = append_source_map(
            &conn,
            &[SourceMapRow {
                item_id: "lh:2".into(),
                record_id: "r1".into(),
                platform: "lh".into(),
                crawl_date: "2025-11-03".into(),
            }],
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ProvenanceViolation>().is_some());
        assert_eq!(source_map_len(&conn).unwrap(), 1);
    }

    #[test]
    fn assignments_round_trip() {
        let conn = test_conn();
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        append_source_map(
            &conn,
            &[
                SourceMapRow {
                    item_id: "lh:1".into(),
                    record_id: "r1".into(),
                    platform: "lh".into(),
                    crawl_date: "2025-11-02".into(),
                },
                SourceMapRow {
                    item_id: "lh:1".into(),
                    record_id: "r9".into(),
                    platform: "sh".into(),
                    crawl_date: "2025-11-02".into(),
                },
            ],
        )
        .unwrap();

        let assignments = load_assignments(&conn).unwrap();
        assert_eq!(
            assignments.get(&("sh".to_string(), "r9".to_string())),
            Some(&"lh:1".to_string())
        );
        let sizes = load_cluster_sizes(&conn).unwrap();
        assert_eq!(sizes.get("lh:1"), Some(&2));
    }

    #[test]
    fn geocode_cache_round_trips() {
        let conn = test_conn();
        let geocoded = Geocoded {
            addr_std: "서울특별시 강동구 고덕동".into(),
            lat: 37.55,
            lng: 127.15,
        };
        save_geocode_cache(&conn, vec![("서울 강동구 고덕동 123", &geocoded)].into_iter())
            .unwrap();
        let cache = load_geocode_cache(&conn).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache["서울 강동구 고덕동 123"].lat, 37.55);
    }

    #[test]
    fn unit_upsert_replaces_by_type() {
        let conn = test_conn();
        upsert_items(&conn, &[item("lh:1")]).unwrap();
        upsert_units(
            &conn,
            &[UnitUpsert {
                item_id: "lh:1".into(),
                unit_type: "29A".into(),
                area_m2: Some(29.34),
                deposit_krw: Some(15_000_000),
                rent_krw: Some(200_000),
            }],
        )
        .unwrap();
        upsert_units(
            &conn,
            &[UnitUpsert {
                item_id: "lh:1".into(),
                unit_type: "29A".into(),
                area_m2: Some(29.34),
                deposit_krw: Some(16_000_000),
                rent_krw: Some(210_000),
            }],
        )
        .unwrap();
        assert_eq!(get_stats(&conn).unwrap().units, 1);
        let deposit: i64 = conn
            .query_row(
                "SELECT deposit_krw FROM units WHERE unit_type = '29A'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(deposit, 16_000_000);
    }
}
