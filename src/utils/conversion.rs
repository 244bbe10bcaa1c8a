//! Type conversion utilities.
//!
//! Dates live as `time::Date` in the application and as `chrono::NaiveDate`
//! in PostgreSQL. Upstream JSON numbers arrive as numbers, numeric strings or
//! null and are coerced here.

use anyhow::Context;
use serde_json::Value;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, Month,
    OffsetDateTime, PrimitiveDateTime, Time,
};

// ============================================
// Date Conversions
// ============================================

/// Convert a `time::Date` to `chrono::NaiveDate` (PostgreSQL `DATE`).
pub fn to_naive_date(date: Date) -> chrono::NaiveDate {
    // time::Date is always a valid calendar date
    chrono::NaiveDate::from_ymd_opt(date.year(), date.month() as u32, date.day() as u32)
        .unwrap_or_default()
}

/// Convert a `chrono::NaiveDate` back to `time::Date`.
pub fn from_naive_date(date: chrono::NaiveDate) -> anyhow::Result<Date> {
    use chrono::Datelike;

    let month = Month::try_from(date.month() as u8).context("Invalid month")?;
    Date::from_calendar_date(date.year(), month, date.day() as u8)
        .with_context(|| format!("Date {} out of range", date))
}

/// Convert `time::OffsetDateTime` to `chrono::DateTime<Utc>`.
pub fn to_chrono_utc(ts: OffsetDateTime) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::<chrono::Utc>::from_timestamp(ts.unix_timestamp(), ts.nanosecond())
        .unwrap_or_default()
}

/// Convert `chrono::DateTime<Utc>` to `time::OffsetDateTime`.
pub fn from_chrono_utc(ts: chrono::DateTime<chrono::Utc>) -> anyhow::Result<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp(ts.timestamp())?
        .replace_nanosecond(ts.timestamp_subsec_nanos())?)
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> anyhow::Result<Date> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

/// Parse an upstream timestamp.
///
/// Accepts RFC 3339 (`2024-01-01T23:01:37.146Z`), a naive ISO datetime
/// (assumed UTC), or a bare date (midnight UTC).
pub fn parse_timestamp(s: &str) -> anyhow::Result<OffsetDateTime> {
    let s = s.trim();
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(ts);
    }
    if let Ok(ts) = PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"),
    ) {
        return Ok(ts.assume_utc());
    }
    let date = parse_date(s).with_context(|| format!("Invalid timestamp '{}'", s))?;
    Ok(OffsetDateTime::new_utc(date, Time::MIDNIGHT))
}

// ============================================
// Lenient Numeric Coercion
// ============================================

/// Coerce a JSON value to f64.
///
/// Numbers pass through, numeric strings are parsed, null/empty is `None`.
/// Anything else (including NaN/inf) is `Err` so the caller can log it.
pub fn value_to_f64(value: &Value) -> Result<Option<f64>, String> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(format!("unexpected JSON type: {}", other)),
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("not a finite number: {}", value)),
    }
}

/// Coerce a JSON value to a string, stringifying scalars deterministically.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Coerce a JSON value to a list of strings, dropping nulls.
pub fn value_to_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        Value::Null => Vec::new(),
        scalar => value_to_string(scalar).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime};

    #[test]
    fn test_naive_date_round_trip_including_sentinel() {
        for d in [date!(2024 - 02 - 29), date!(1970 - 01 - 01), date!(9999 - 12 - 31)] {
            assert_eq!(from_naive_date(to_naive_date(d)).unwrap(), d);
        }
    }

    #[test]
    fn test_chrono_timestamp_round_trip() {
        let ts = datetime!(2024-06-01 12:30:45.123 UTC);
        assert_eq!(from_chrono_utc(to_chrono_utc(ts)).unwrap(), ts);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2024-01-01T23:01:37.146Z").unwrap(),
            datetime!(2024-01-01 23:01:37.146 UTC)
        );
        assert_eq!(
            parse_timestamp("2024-01-01T23:01:37").unwrap(),
            datetime!(2024-01-01 23:01:37 UTC)
        );
        assert_eq!(
            parse_timestamp("2024-01-01").unwrap(),
            datetime!(2024-01-01 0:00 UTC)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_value_to_f64_is_lenient() {
        assert_eq!(value_to_f64(&json!(1.5)), Ok(Some(1.5)));
        assert_eq!(value_to_f64(&json!(3)), Ok(Some(3.0)));
        assert_eq!(value_to_f64(&json!("2.25")), Ok(Some(2.25)));
        assert_eq!(value_to_f64(&json!(null)), Ok(None));
        assert_eq!(value_to_f64(&json!("")), Ok(None));
        assert!(value_to_f64(&json!("abc")).is_err());
        assert!(value_to_f64(&json!("NaN")).is_err());
        assert!(value_to_f64(&json!([1])).is_err());
    }

    #[test]
    fn test_string_list_drops_nulls() {
        assert_eq!(
            value_to_string_list(&json!(["0x1", null, "0x2"])),
            vec!["0x1".to_string(), "0x2".to_string()]
        );
        assert!(value_to_string_list(&json!(null)).is_empty());
    }
}
