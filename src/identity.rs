use sha2::{Digest, Sha256};

use crate::extras::{Platform, PlatformExtras};
use crate::normalize::NormalizedFields;

const HASH_ID_LEN: usize = 16;

/// How an item key was derived. Hash-keyed records are eligible for the
/// near-duplicate merge pass; native-keyed records are not reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Native,
    Hash,
}

#[derive(Debug, Clone)]
pub struct ItemKey {
    pub id: String,
    pub source: KeySource,
}

/// Map a record's normalized fields to its logical item key. Pure: the
/// same inputs yield the same key across runs and restarts, which is what
/// makes merges idempotent.
pub fn resolve_item_id(
    platform: &Platform,
    extras: &PlatformExtras,
    fields: &NormalizedFields,
) -> ItemKey {
    if let Some(native) = extras.native_key() {
        return ItemKey {
            id: format!("{platform}:{native}"),
            source: KeySource::Native,
        };
    }
    ItemKey {
        id: composite_hash(platform, fields),
        source: KeySource::Hash,
    }
}

/// sha256 over the stable normalized projection, truncated. The address
/// component is the locality key derived from the raw address, not the
/// geocoded addr_std: geocoding refinements must never move identity.
fn composite_hash(platform: &Platform, fields: &NormalizedFields) -> String {
    let apply_start = fields
        .apply_start
        .map(|d| d.to_string())
        .unwrap_or_default();
    let payload = format!(
        "{}|{}|{}|{}",
        platform, fields.addr_key, fields.title_norm, apply_start
    );
    let digest = Sha256::digest(payload.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..HASH_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::Platform;

    fn fields(title: &str, addr: &str, apply_start: Option<&str>) -> NormalizedFields {
        NormalizedFields {
            title: title.into(),
            title_norm: crate::normalize::address::normalize_title(title),
            address_raw: addr.into(),
            addr_norm: crate::normalize::address::normalize_address(addr),
            addr_key: crate::normalize::address::address_key(addr),
            deposit_krw: None,
            deposit_raw: None,
            rent_krw: None,
            rent_raw: None,
            area_m2: None,
            area_unit: None,
            area_raw: None,
            apply_start: apply_start.map(|s| s.parse().unwrap()),
            apply_end: None,
            apply_raw: None,
            category: None,
        }
    }

    #[test]
    fn native_key_wins() {
        let extras = PlatformExtras::parse(&Platform::Lh, r#"{"panId": 20000569}"#);
        let key = resolve_item_id(&Platform::Lh, &extras, &fields("공고", "서울 강동구 고덕동", None));
        assert_eq!(key.id, "lh:20000569");
        assert_eq!(key.source, KeySource::Native);
    }

    #[test]
    fn hash_is_deterministic() {
        let extras = PlatformExtras::parse(&Platform::Sh, "{}");
        let f = fields("행복주택 모집공고", "서울특별시 강동구 고덕동 123", Some("2024-03-01"));
        let a = resolve_item_id(&Platform::Sh, &extras, &f);
        let b = resolve_item_id(&Platform::Sh, &extras, &f);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
        assert_eq!(a.source, KeySource::Hash);
    }

    #[test]
    fn title_whitespace_variance_does_not_move_identity() {
        let extras = PlatformExtras::parse(&Platform::Sh, "{}");
        let a = resolve_item_id(
            &Platform::Sh,
            &extras,
            &fields("행복주택 모집공고", "서울특별시 강동구 고덕동 123", None),
        );
        let b = resolve_item_id(
            &Platform::Sh,
            &extras,
            &fields("행복주택모집공고", "서울특별시 강동구 고덕동 123", None),
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn different_platform_different_id() {
        let extras = PlatformExtras::parse(&Platform::Sh, "{}");
        let f = fields("행복주택 모집공고", "서울특별시 강동구 고덕동 123", None);
        let a = resolve_item_id(&Platform::Sh, &extras, &f);
        let b = resolve_item_id(&Platform::Gh, &extras, &f);
        assert_ne!(a.id, b.id);
    }
}
