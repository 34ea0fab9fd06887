use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source platform of a raw record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Lh,
    Sh,
    Gh,
    Myhome,
    Other(String),
}

impl Platform {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "lh" => Platform::Lh,
            "sh" => Platform::Sh,
            "gh" => Platform::Gh,
            "myhome" => Platform::Myhome,
            other => Platform::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Lh => "lh",
            Platform::Sh => "sh",
            Platform::Gh => "gh",
            Platform::Myhome => "myhome",
            Platform::Other(s) => s,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a platform's `extras_json` bag. Known keys get fields so
/// normalization rules stay exhaustive per platform; everything else lands
/// in the escape-hatch map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlatformExtras {
    Lh {
        pan_id: Option<String>,
        notice_type: Option<String>,
        rest: BTreeMap<String, Value>,
    },
    Sh {
        notice_no: Option<String>,
        category: Option<String>,
        rest: BTreeMap<String, Value>,
    },
    Gh {
        seq: Option<String>,
        rest: BTreeMap<String, Value>,
    },
    Myhome {
        hsmno: Option<String>,
        suply_type: Option<String>,
        rest: BTreeMap<String, Value>,
    },
    Other(BTreeMap<String, Value>),
}

impl PlatformExtras {
    /// Parse an `extras_json` string for the given platform. Malformed or
    /// empty JSON degrades to an empty bag rather than failing the record.
    pub fn parse(platform: &Platform, json: &str) -> Self {
        let map = match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(m)) => m.into_iter().collect::<BTreeMap<_, _>>(),
            _ => BTreeMap::new(),
        };
        Self::from_map(platform, map)
    }

    fn from_map(platform: &Platform, mut map: BTreeMap<String, Value>) -> Self {
        match platform {
            Platform::Lh => PlatformExtras::Lh {
                pan_id: take_string(&mut map, &["panId", "pan_id", "PAN_ID"]),
                notice_type: take_string(&mut map, &["uppAisTpNm", "notice_type"]),
                rest: map,
            },
            Platform::Sh => PlatformExtras::Sh {
                notice_no: take_string(&mut map, &["noticeNo", "notice_no", "seq"]),
                category: take_string(&mut map, &["category", "suplyType"]),
                rest: map,
            },
            Platform::Gh => PlatformExtras::Gh {
                seq: take_string(&mut map, &["seq", "noticeSeq"]),
                rest: map,
            },
            Platform::Myhome => PlatformExtras::Myhome {
                hsmno: take_string(&mut map, &["hsmno", "hsmNo"]),
                suply_type: take_string(&mut map, &["suplyType", "suply_type"]),
                rest: map,
            },
            Platform::Other(_) => PlatformExtras::Other(map),
        }
    }

    /// Stable platform-native identifier, when the platform supplies one.
    pub fn native_key(&self) -> Option<&str> {
        match self {
            PlatformExtras::Lh { pan_id, .. } => pan_id.as_deref(),
            PlatformExtras::Sh { notice_no, .. } => notice_no.as_deref(),
            PlatformExtras::Gh { seq, .. } => seq.as_deref(),
            PlatformExtras::Myhome { hsmno, .. } => hsmno.as_deref(),
            PlatformExtras::Other(_) => None,
        }
    }

    /// Listing category hint (supply type, notice type) if the platform
    /// carries one in its extras.
    pub fn category_hint(&self) -> Option<&str> {
        match self {
            PlatformExtras::Lh { notice_type, .. } => notice_type.as_deref(),
            PlatformExtras::Sh { category, .. } => category.as_deref(),
            PlatformExtras::Myhome { suply_type, .. } => suply_type.as_deref(),
            _ => None,
        }
    }
}

/// Pull the first present key out of the map, coercing numbers to strings
/// (platform APIs are inconsistent about numeric ids).
fn take_string(map: &mut BTreeMap<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = map.remove(*key) {
            match v {
                Value::String(s) if !s.trim().is_empty() => return Some(s),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}
