// Value coercion helpers shared by the query, derive and aggregate modules

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a date-like string into a UTC instant.
///
/// Accepts RFC 3339, naive date-times (read as UTC) and bare `YYYY-MM-DD`
/// dates (midnight UTC). Anything else is `None`.
pub fn parse_instant(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The instant held by a JSON value, if it is a date-like string.
pub fn instant_of(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_instant)
}

/// Numeric reading of a value. Numeric strings count as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Render an accumulated number back to JSON, as an integer when it is whole.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Scalar rendering used for group keys and ids. Nulls, arrays and objects
/// have no scalar rendering.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    #[test]
    fn test_parse_instant_formats() {
        let rfc = parse_instant("2024-03-05T10:30:00Z").unwrap();
        let offset = parse_instant("2024-03-05T12:30:00+02:00").unwrap();
        assert_eq!(rfc, offset);

        let naive = parse_instant("2024-03-05 10:30:00").unwrap();
        assert_eq!(naive, rfc);

        let date = parse_instant("2024-03-05").unwrap();
        assert_eq!(date.day(), 5);
        assert!(date < rfc);
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        assert!(parse_instant("").is_none());
        assert!(parse_instant("yesterday").is_none());
        assert!(parse_instant("2024-13-45").is_none());
    }

    #[test]
    fn test_as_number() {
        assert_eq!(as_number(&json!(3)), Some(3.0));
        assert_eq!(as_number(&json!("45000")), Some(45000.0));
        assert_eq!(as_number(&json!("n/a")), None);
        assert_eq!(as_number(&json!(null)), None);
        assert_eq!(as_number(&json!([1])), None);
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(12.0), json!(12));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}
