use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

// 2024.03.01 / 2024-03-01 / 2024/03/01 / 2024년 3월 1일, optional trailing '.'
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[.\-/년]\s*(\d{1,2})\s*[.\-/월]\s*(\d{1,2})\s*[.일]?").unwrap()
});

/// First date in the string, normalized to a calendar date.
pub fn parse_date(input: &str) -> Result<NaiveDate, String> {
    let caps = DATE_RE
        .captures(input)
        .ok_or_else(|| format!("no date pattern in `{}`", input.trim()))?;
    let (y, m, d) = (
        caps[1].parse::<i32>().unwrap(),
        caps[2].parse::<u32>().unwrap(),
        caps[3].parse::<u32>().unwrap(),
    );
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| format!("invalid calendar date {y}-{m}-{d}"))
}

/// A `~`-separated range splits into start/end; a lone date is a start
/// with no end.
pub fn parse_date_range(input: &str) -> Result<(NaiveDate, Option<NaiveDate>), String> {
    match input.split_once('~') {
        Some((start, end)) => {
            let start = parse_date(start)?;
            // An unparsable right side degrades to an open-ended range.
            Ok((start, parse_date(end).ok()))
        }
        None => Ok((parse_date(input)?, None)),
    }
}
