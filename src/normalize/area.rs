use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static AREA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*(㎡|m²|m2|평)").unwrap());

/// 1평 = 3.3058㎡ (legal conversion factor).
pub const PYEONG_TO_M2: f64 = 3.3058;

/// Unit the area was originally expressed in; retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaUnit {
    SquareMeters,
    Pyeong,
}

impl AreaUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaUnit::SquareMeters => "m2",
            AreaUnit::Pyeong => "pyeong",
        }
    }
}

/// Parse an area string, converting 평 to ㎡. Returns the converted value
/// and the unit of origin.
pub fn parse_area(input: &str) -> Result<(f64, AreaUnit), String> {
    let caps = AREA_RE
        .captures(input.trim())
        .ok_or_else(|| format!("no area pattern in `{}`", input.trim()))?;
    let value: f64 = caps[1].parse().map_err(|_| "bad number".to_string())?;
    match &caps[2] {
        "평" => Ok((value * PYEONG_TO_M2, AreaUnit::Pyeong)),
        _ => Ok((value, AreaUnit::SquareMeters)),
    }
}
