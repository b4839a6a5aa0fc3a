//! Helper functions for cycler file parsing
//!
//! Number parsing that tolerates decimal commas, date conversions for the
//! timestamp encodings found in instrument files, and fixed-width string
//! decoding for binary headers.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Parse a number written with either a decimal point or a decimal comma
///
/// European-locale exports write `3,1415`; thousands separators never
/// appear in instrument output, so a single comma is always decimal.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) if text.matches(',').count() == 1 => text.replace(',', ".").parse().ok(),
        Err(_) => None,
    }
}

/// Convert an OLE automation date (days since 1899-12-30) to a timestamp
pub fn ole_to_datetime(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(microseconds(days * 86_400_000_000.0)?)
}

/// Offset in seconds expressed as a signed duration (microsecond precision)
///
/// `None` for non-finite values and for offsets beyond the `i64`
/// microsecond range.
pub fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    microseconds(seconds * 1e6)
}

fn microseconds(value: f64) -> Option<Duration> {
    let micros = value.round();
    // i64::MAX as f64 rounds up to 2^63, which no longer fits
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::microseconds(micros as i64))
}

/// Date stamp from a module header or settings block: `MM/DD/YY` or `MM-DD-YY`
pub fn parse_short_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDate::parse_from_str(text, "%m/%d/%y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%m-%d-%y"))
        .ok()
}

/// Length-prefixed string; truncated to what is actually available
pub fn pascal_string(bytes: &[u8]) -> String {
    match bytes.split_first() {
        Some((&len, rest)) => {
            let len = (len as usize).min(rest.len());
            latin1(&rest[..len])
        }
        None => String::new(),
    }
}

/// Decode Latin-1 bytes, stopping at the first NUL
pub fn latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Text file contents: UTF-8 when valid, otherwise Latin-1
///
/// EC-Lab writes its exports in the Windows code page, so `µ` and `°`
/// arrive as single bytes.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Fixed-width header field with NUL and space padding removed
pub fn trim_field(field: &str) -> &str {
    field.trim_end_matches(|c: char| c == '\0' || c == ' ')
}

/// Append a numeric suffix to names already used (`Ewe/V`, `Ewe/V 2`, ...)
pub fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut n = 2;
        while seen.contains(&candidate) {
            candidate = format!("{name} {n}");
            n += 1;
        }
        seen.push(candidate);
    }
    seen
}
