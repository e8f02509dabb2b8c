use crate::schema::RawDate;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const FALLBACK_DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d.%m.%Y",
];

const FALLBACK_DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Spreadsheet day zero.
pub fn serial_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// Normalizes any supported date encoding to a calendar date.
///
/// Returns `None` for anything that cannot be placed in time. Time-of-day is
/// always discarded.
pub fn normalize(raw: &RawDate) -> Option<NaiveDate> {
    match raw {
        RawDate::Serial(serial) => from_serial(*serial),
        RawDate::Text(text) => normalize_text(text),
    }
}

/// Converts a spreadsheet serial number (fractional part = time of day).
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    serial_epoch().checked_add_days(Days::new(serial.floor() as u64))
}

pub fn normalize_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // "06-JAN-0026 14:05" and "1/6/2026, 8:00:00 AM" carry a trailing time
    let date_part = trimmed.split_whitespace().next()?.trim_end_matches(',');

    if let Some(date) = parse_day_month_name_year(date_part) {
        return Some(date);
    }

    if let Some(date) = parse_month_day_year(date_part) {
        return Some(date);
    }

    // Serial numbers exported as text
    if let Ok(serial) = trimmed.parse::<f64>() {
        return from_serial(serial);
    }

    if let Some(date) = parse_fallback(trimmed) {
        return Some(date);
    }

    // Drop trailing time tokens one at a time: "Jan 6, 2026 10:00 AM"
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    (1..tokens.len()).rev().find_map(|len| {
        let prefix = tokens[..len].join(" ");
        parse_fallback(prefix.trim_end_matches(','))
    })
}

/// `DD-MMM-YYYY` with a 3 to 9 letter month name. Years below 100 use the
/// source's `00YY` convention and resolve to `2000 + YY`.
fn parse_day_month_name_year(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 {
        return None;
    }

    let day = parse_digits(parts[0], 1, 2)? as u32;
    let month = month_from_name(parts[1])?;
    let year = parse_digits(parts[2], 1, 4)?;

    NaiveDate::from_ymd_opt(expand_year(year), month, day)
}

/// US ordered `M/D/YYYY`.
fn parse_month_day_year(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 {
        return None;
    }

    let month = parse_digits(parts[0], 1, 2)? as u32;
    let day = parse_digits(parts[1], 1, 2)? as u32;
    let year = parse_digits(parts[2], 1, 4)?;

    NaiveDate::from_ymd_opt(expand_year(year), month, day)
}

fn parse_fallback(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for format in FALLBACK_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }

    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
}

fn month_from_name(token: &str) -> Option<u32> {
    if !(3..=9).contains(&token.len()) || !token.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let lower = token.to_ascii_lowercase();
    MONTH_NAMES
        .iter()
        .position(|name| name.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

fn parse_digits(token: &str, min_len: usize, max_len: usize) -> Option<i32> {
    if token.len() < min_len || token.len() > max_len || !token.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    token.parse().ok()
}

fn expand_year(year: i32) -> i32 {
    if year < 100 {
        2000 + year
    } else {
        year
    }
}
