//! Cell normalizers.
//!
//! Every function here is total: malformed input degrades to `None`, `0` or
//! `0.0`, never an error. One bad cell must not abort an import of thousands
//! of rows.

use chrono::{DateTime, Days, NaiveDate};

use crate::config::FieldKind;
use crate::model::CellValue;

/// Serials at or below this are not treated as dates (1969-12-30 and earlier).
const SERIAL_FLOOR: f64 = 25567.0;
/// 9999-12-31.
const SERIAL_CEILING: f64 = 2_958_465.0;

/// Formats tried after ISO, day-first and serial parsing failed.
const LOOSE_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Canonicalize a date cell.
///
/// Accepts `YYYY-MM-DD` (optionally followed by a time), `DD/MM/YYYY`,
/// `DD/MM/YY` (years below 50 are 20xx), spreadsheet day serials on the 1900
/// epoch, and a handful of other common spellings.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = parse_iso(text) {
        return Some(date);
    }
    if let Some(date) = parse_day_first(text) {
        return Some(date);
    }
    if let Ok(serial) = text.parse::<f64>() {
        if let Some(date) = date_from_serial(serial) {
            return Some(date);
        }
    }
    parse_loose(text)
}

/// Days since 1899-12-30. The base sits two days before 1900-01-01 to absorb
/// the phantom 1900-02-29 of the spreadsheet epoch.
pub fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial <= SERIAL_FLOOR || serial > SERIAL_CEILING {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_days(Days::new(serial.floor() as u64))
}

fn first_token(text: &str) -> &str {
    text.split(['T', ' ']).next().unwrap_or(text)
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    let token = first_token(text);
    let bytes = token.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
}

fn parse_day_first(text: &str) -> Option<NaiveDate> {
    let token = text.split_whitespace().next()?;
    let mut parts = token.split('/');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(day) || !all_digits(month) || !all_digits(year) {
        return None;
    }

    let day: u32 = day.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let year: i32 = match year.len() {
        4 => year.parse().ok()?,
        2 => {
            let yy: i32 = year.parse().ok()?;
            if yy < 50 { 2000 + yy } else { 1900 + yy }
        }
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_loose(text: &str) -> Option<NaiveDate> {
    for fmt in LOOSE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|dt| dt.date_naive())
        .ok()
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Parse a currency-like amount. `"€ 1.234,56"`, `"1,234.56"` and `"1234.56"`
/// all give `1234.56`. Anything without digits gives `0.0`.
pub fn normalize_currency(raw: &str) -> f64 {
    let text = raw.trim();
    let first_digit = text.find(|c: char| c.is_ascii_digit());
    let Some(first_digit) = first_digit else {
        return 0.0;
    };
    let negative = text[..first_digit].contains('-')
        || (text.starts_with('(') && text.ends_with(')'));

    let body: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let canonical = match (body.rfind('.'), body.rfind(',')) {
        (Some(dot), Some(comma)) => {
            // The separator appearing last is the decimal one.
            let (decimal, thousands) = if dot > comma { ('.', ',') } else { (',', '.') };
            body.replace(thousands, "").replace(decimal, ".")
        }
        (Some(_), None) if body.matches('.').count() > 1 => body.replace('.', ""),
        (None, Some(_)) if body.matches(',').count() > 1 => body.replace(',', ""),
        (None, Some(_)) => body.replace(',', "."),
        _ => body,
    };

    match canonical.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            if negative { -v } else { v }
        }
        _ => 0.0,
    }
}

/// Keep the digits (and a leading minus). `"1.200 km"` gives `1200`.
pub fn normalize_integer(raw: &str) -> i64 {
    let text = raw.trim();
    let negative = text.starts_with('-');
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return 0;
    }
    match digits.parse::<i64>() {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Cell dispatch
// ---------------------------------------------------------------------------

pub fn normalize_date_cell(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(d) => Some(*d),
        CellValue::Integer(n) => date_from_serial(*n as f64),
        CellValue::Number(n) => date_from_serial(*n),
        CellValue::Text(s) => normalize_date(s),
        CellValue::Empty => None,
    }
}

pub fn normalize_currency_cell(value: &CellValue) -> f64 {
    match value {
        CellValue::Number(n) if n.is_finite() => *n,
        CellValue::Integer(n) => *n as f64,
        CellValue::Text(s) => normalize_currency(s),
        _ => 0.0,
    }
}

pub fn normalize_integer_cell(value: &CellValue) -> i64 {
    match value {
        CellValue::Integer(n) => *n,
        // `as` saturates and maps NaN to 0.
        CellValue::Number(n) => n.trunc() as i64,
        CellValue::Text(s) => normalize_integer(s),
        _ => 0,
    }
}

/// Normalize one cell per its configured kind.
///
/// Returns `None` only for a date that could not be parsed, so the caller can
/// apply its fallback policy.
pub fn normalize_cell(kind: FieldKind, value: &CellValue) -> Option<CellValue> {
    match kind {
        FieldKind::Text => Some(match value {
            CellValue::Text(s) => CellValue::from(s.trim()),
            other => other.clone(),
        }),
        FieldKind::Date => normalize_date_cell(value).map(CellValue::Date),
        FieldKind::Currency => Some(CellValue::Number(normalize_currency_cell(value))),
        FieldKind::Integer => Some(CellValue::Integer(normalize_integer_cell(value))),
    }
}
