use std::sync::LazyLock;

use regex::Regex;

static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static BUNJI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:-\d+)?)\s*번지").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace, drop parentheticals, unify `N번지` to the bare
/// lot number. Output feeds the geocode cache key and the address-match
/// side of dedup, so it must be deterministic.
pub fn normalize_address(raw: &str) -> String {
    let s = PAREN_RE.replace_all(raw, " ");
    let s = BUNJI_RE.replace_all(&s, "$1");
    WS_RE.replace_all(s.trim(), " ").to_string()
}

/// Coarse locality key: tokens up to and including the dong/eup/myeon
/// level. Two addresses in the same sigungu/dong share a key even when
/// the lot details differ.
pub fn address_key(addr: &str) -> String {
    let normalized = normalize_address(addr);
    let mut key_tokens = Vec::new();
    for token in normalized.split_whitespace() {
        key_tokens.push(token);
        if ends_with_any(token, &['동', '읍', '면', '가', '리']) && key_tokens.len() >= 2 {
            break;
        }
        if key_tokens.len() == 4 {
            break;
        }
    }
    key_tokens.join(" ")
}

fn ends_with_any(token: &str, suffixes: &[char]) -> bool {
    token
        .chars()
        .last()
        .map(|c| suffixes.contains(&c))
        .unwrap_or(false)
}

/// Strip whitespace and punctuation variance for identity hashing and
/// title similarity. Keeps letters, digits, and Hangul only.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
