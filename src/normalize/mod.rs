pub mod address;
pub mod area;
pub mod dates;
pub mod html;
pub mod money;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::NormalizationError;
use crate::raw::RawRecord;

pub use area::AreaUnit;

/// Per-record projection onto the common schema. Recomputed from the raw
/// record every run; a failed parse nulls the numeric field and keeps the
/// raw string next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFields {
    pub title: String,
    pub title_norm: String,
    pub address_raw: String,
    pub addr_norm: String,
    pub addr_key: String,
    pub deposit_krw: Option<i64>,
    pub deposit_raw: Option<String>,
    pub rent_krw: Option<i64>,
    pub rent_raw: Option<String>,
    pub area_m2: Option<f64>,
    pub area_unit: Option<AreaUnit>,
    pub area_raw: Option<String>,
    pub apply_start: Option<NaiveDate>,
    pub apply_end: Option<NaiveDate>,
    pub apply_raw: Option<String>,
    pub category: Option<String>,
}

/// Normalize one record. Pure aside from the HTML string handed in;
/// field-level failures are collected, never fatal.
pub fn normalize(record: &RawRecord, detail_html: Option<&str>) -> (NormalizedFields, Vec<NormalizationError>) {
    let mut errors = Vec::new();

    let detail = detail_html
        .map(|h| html::extract_detail_fields(&record.platform, h))
        .unwrap_or_default();

    let title = record.title.trim().to_string();
    let address_raw = record.address.clone();
    let addr_norm = address::normalize_address(&address_raw);
    let addr_key = address::address_key(&address_raw);

    let (deposit_krw, deposit_raw) = parse_money_field("deposit_krw", detail.deposit, &mut errors);
    let (rent_krw, rent_raw) = parse_money_field("rent_krw", detail.rent, &mut errors);

    let (area_m2, area_unit, area_raw) = match detail.area {
        Some(raw) => match area::parse_area(&raw) {
            Ok((v, unit)) => (Some(v), Some(unit), Some(raw)),
            Err(reason) => {
                errors.push(NormalizationError::new("area_m2", reason));
                (None, None, Some(raw))
            }
        },
        None => (None, None, None),
    };

    let (apply_start, apply_end, apply_raw) = match detail.apply_period {
        Some(raw) => match dates::parse_date_range(&raw) {
            Ok((start, end)) => (Some(start), end, Some(raw)),
            Err(reason) => {
                errors.push(NormalizationError::new("apply_start", reason));
                (None, None, Some(raw))
            }
        },
        None => (None, None, None),
    };

    let category = detail
        .category
        .or_else(|| record.extras.category_hint().map(str::to_string))
        .or_else(|| category_from_title(&title));

    let fields = NormalizedFields {
        title_norm: address::normalize_title(&title),
        title,
        address_raw,
        addr_norm,
        addr_key,
        deposit_krw,
        deposit_raw,
        rent_krw,
        rent_raw,
        area_m2,
        area_unit,
        area_raw,
        apply_start,
        apply_end,
        apply_raw,
        category,
    };
    (fields, errors)
}

fn parse_money_field(
    field: &'static str,
    raw: Option<String>,
    errors: &mut Vec<NormalizationError>,
) -> (Option<i64>, Option<String>) {
    match raw {
        Some(raw) => match money::parse_krw(&raw) {
            Ok(v) => (Some(v), Some(raw)),
            Err(reason) => {
                errors.push(NormalizationError::new(field, reason));
                (None, Some(raw))
            }
        },
        None => (None, None),
    }
}

const CATEGORY_KEYWORDS: &[&str] = &[
    "행복주택",
    "국민임대",
    "공공임대",
    "영구임대",
    "전세임대",
    "매입임대",
    "장기전세",
    "분양",
];

fn category_from_title(title: &str) -> Option<String> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|kw| title.contains(**kw))
        .map(|kw| kw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::{Platform, PlatformExtras};
    use chrono::NaiveDate;

    fn record(title: &str, address: &str) -> RawRecord {
        RawRecord {
            record_id: "r1".into(),
            platform: Platform::Lh,
            title: title.into(),
            address: address.into(),
            html_path: None,
            image_paths: vec![],
            attachments_dir: None,
            table_paths: vec![],
            extras: PlatformExtras::parse(&Platform::Lh, "{}"),
            crawled_at: chrono::Utc::now(),
        }
    }

    const DETAIL: &str = r#"
        <html><body><table>
          <tr><th>임대보증금</th><td>1천5백만원</td></tr>
          <tr><th>월임대료</th><td>50만원</td></tr>
          <tr><th>전용면적</th><td>10평</td></tr>
          <tr><th>신청접수</th><td>2024.03.01 ~ 2024.03.15</td></tr>
        </table></body></html>"#;

    #[test]
    fn full_record_normalizes() {
        let rec = record("행복주택 모집공고", "서울특별시 강동구 고덕동 123-4");
        let (fields, errors) = normalize(&rec, Some(DETAIL));
        assert!(errors.is_empty());
        assert_eq!(fields.deposit_krw, Some(15_000_000));
        assert_eq!(fields.rent_krw, Some(500_000));
        assert!((fields.area_m2.unwrap() - 33.058).abs() < 0.001);
        assert_eq!(fields.area_unit, Some(AreaUnit::Pyeong));
        assert_eq!(fields.apply_start, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(fields.apply_end, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(fields.category.as_deref(), Some("행복주택"));
        assert_eq!(fields.title_norm, "행복주택모집공고");
    }

    #[test]
    fn bad_money_keeps_raw_and_nulls_value() {
        let html = "<html><body><p>보증금</p><p>협의 후 결정</p></body></html>";
        let rec = record("공고", "서울특별시 구로구 오류동 1");
        let (fields, errors) = normalize(&rec, Some(html));
        assert_eq!(fields.deposit_krw, None);
        assert_eq!(fields.deposit_raw.as_deref(), Some("협의 후 결정"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "deposit_krw");
    }

    #[test]
    fn no_html_still_normalizes_address() {
        let rec = record("국민임대 입주자 모집", "경기도 성남시 분당구 정자동 178-1번지");
        let (fields, errors) = normalize(&rec, None);
        assert!(errors.is_empty());
        assert_eq!(fields.addr_norm, "경기도 성남시 분당구 정자동 178-1");
        assert_eq!(fields.category.as_deref(), Some("국민임대"));
        assert!(fields.deposit_krw.is_none());
    }
}
