use scraper::{Html, Selector};

use crate::extras::Platform;

/// Field strings lifted from a detail page, still raw. The manifest wins
/// when it already carries a value; these fill the gaps.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub deposit: Option<String>,
    pub rent: Option<String>,
    pub area: Option<String>,
    pub apply_period: Option<String>,
    pub category: Option<String>,
}

// Label aliases in priority order. Platforms disagree on wording, so each
// platform gets its own head of the list and falls through to the common
// tail.
const DEPOSIT_LABELS: &[&str] = &["임대보증금", "보증금", "계약금"];
const RENT_LABELS: &[&str] = &["월임대료", "임대료", "월세"];
const AREA_LABELS: &[&str] = &["전용면적", "공급면적", "면적"];
const PERIOD_LABELS: &[&str] = &["신청접수", "청약접수", "접수기간", "모집기간", "공고기간"];
const CATEGORY_LABELS: &[&str] = &["공급유형", "주택유형", "유형"];

/// Scan a detail page's visible text as label → value pairs.
pub fn extract_detail_fields(platform: &Platform, html: &str) -> DetailFields {
    let tokens = visible_tokens(html);
    let labels = platform_labels(platform);

    DetailFields {
        deposit: value_after(&tokens, labels.deposit),
        rent: value_after(&tokens, labels.rent),
        area: value_after(&tokens, labels.area),
        apply_period: value_after(&tokens, labels.period),
        category: value_after(&tokens, labels.category),
    }
}

struct LabelSet {
    deposit: &'static [&'static str],
    rent: &'static [&'static str],
    area: &'static [&'static str],
    period: &'static [&'static str],
    category: &'static [&'static str],
}

fn platform_labels(platform: &Platform) -> LabelSet {
    match platform {
        // SH notices label the deposit column "임대보증금" and the intake
        // window "청약접수"; LH sticks to "신청접수".
        Platform::Sh => LabelSet {
            deposit: &["임대보증금", "보증금"],
            rent: RENT_LABELS,
            area: AREA_LABELS,
            period: &["청약접수", "접수기간", "모집기간"],
            category: &["공급유형", "모집유형", "유형"],
        },
        _ => LabelSet {
            deposit: DEPOSIT_LABELS,
            rent: RENT_LABELS,
            area: AREA_LABELS,
            period: PERIOD_LABELS,
            category: CATEGORY_LABELS,
        },
    }
}

/// All visible text, one trimmed token per text node.
fn visible_tokens(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let body_sel = Selector::parse("body").unwrap();

    let mut tokens = Vec::new();
    if let Some(body) = doc.select(&body_sel).next() {
        for t in body.text() {
            let s = t.trim();
            if !s.is_empty() {
                tokens.push(s.to_string());
            }
        }
    }
    tokens
}

/// Value for a label: the next non-label token after the first matching
/// label token, tolerating a trailing colon on the label.
fn value_after(tokens: &[String], labels: &[&str]) -> Option<String> {
    for label in labels {
        let pos = tokens
            .iter()
            .position(|t| t.trim_end_matches([':', '：']).trim() == *label);
        if let Some(i) = pos {
            if let Some(value) = tokens.get(i + 1) {
                let v = value.trim_start_matches([':', '：']).trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LH_DETAIL: &str = r#"
        <html><body>
          <table>
            <tr><th>공급유형</th><td>행복주택</td></tr>
            <tr><th>전용면적</th><td>28.49㎡</td></tr>
            <tr><th>임대보증금</th><td>1천5백만원</td></tr>
            <tr><th>월임대료</th><td>50만원</td></tr>
            <tr><th>신청접수</th><td>2024.03.01 ~ 2024.03.15</td></tr>
          </table>
        </body></html>"#;

    #[test]
    fn lh_table_fields() {
        let f = extract_detail_fields(&Platform::Lh, LH_DETAIL);
        assert_eq!(f.category.as_deref(), Some("행복주택"));
        assert_eq!(f.area.as_deref(), Some("28.49㎡"));
        assert_eq!(f.deposit.as_deref(), Some("1천5백만원"));
        assert_eq!(f.rent.as_deref(), Some("50만원"));
        assert_eq!(f.apply_period.as_deref(), Some("2024.03.01 ~ 2024.03.15"));
    }

    #[test]
    fn colon_labels_tolerated() {
        let html = "<html><body><p>보증금: </p><p>3,000만원</p></body></html>";
        let f = extract_detail_fields(&Platform::Gh, html);
        assert_eq!(f.deposit.as_deref(), Some("3,000만원"));
    }

    #[test]
    fn missing_labels_are_none() {
        let f = extract_detail_fields(&Platform::Lh, "<html><body><p>본문</p></body></html>");
        assert!(f.deposit.is_none());
        assert!(f.apply_period.is_none());
    }
}
