//! Korean won amount parsing: `만원` scale, `억` scale, and the mixed
//! 천/백/십 numerals that show up in notice tables.

/// Parse an amount string into 원.
///
/// `"50만원"` → 500,000; `"1천5백만원"` → 15,000,000; `"1억2,000만원"` →
/// 120,000,000; `"300000원"` passes through. The error is a human-readable
/// reason; callers keep the raw string next to the nulled value.
pub fn parse_krw(input: &str) -> Result<i64, String> {
    let compact: String = input
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let s = compact.strip_suffix('원').unwrap_or(&compact);
    if s.is_empty() {
        return Err("empty amount".into());
    }

    let mut total: i64 = 0;
    let mut rest = s;

    if let Some((eok, tail)) = rest.split_once('억') {
        total += parse_group(eok)?
            .checked_mul(100_000_000)
            .ok_or("amount overflows")?;
        rest = tail;
    }
    if rest.is_empty() {
        return Ok(total);
    }
    if let Some(man) = rest.strip_suffix('만') {
        total += parse_group(man)?
            .checked_mul(10_000)
            .ok_or("amount overflows")?;
        return Ok(total);
    }
    total += parse_group(rest)?;
    Ok(total)
}

/// A digit run optionally interleaved with 천/백/십 units: `"1천5백"` → 1500.
fn parse_group(s: &str) -> Result<i64, String> {
    if s.is_empty() {
        return Err("missing digits before scale suffix".into());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().map_err(|e| e.to_string());
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: i64 = match c {
            '천' => 1_000,
            '백' => 100,
            '십' => 10,
            other => return Err(format!("unrecognized numeral `{other}`")),
        };
        let n: i64 = if digits.is_empty() {
            1
        } else {
            digits.parse().map_err(|_| "bad digit run".to_string())?
        };
        total += n * unit;
        digits.clear();
    }
    if !digits.is_empty() {
        total += digits.parse::<i64>().map_err(|_| "bad digit run".to_string())?;
    }
    Ok(total)
}
