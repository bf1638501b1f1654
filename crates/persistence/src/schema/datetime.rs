//! Parsing of wire date/time representations.
//!
//! Accepted forms, in order of precedence:
//!
//! - RFC 3339 (`2024-03-01T12:00:00Z`, any offset, normalized to UTC)
//! - naive ISO date-times (`2024-03-01T12:00:00`, `2024-03-01 12:00:00`), read as UTC
//! - ISO dates (`2024-03-01`), midnight UTC
//! - epoch timestamps in seconds (`1709294400`, `1709294400.5`)
//! - relative expressions: `now`, `now-7d`, `now+2h` with units `s m h d w`

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parses any accepted form relative to the current instant.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    parse_datetime_at(input, Utc::now())
}

/// Parses any accepted form, resolving relative expressions against `now`.
pub fn parse_datetime_at(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Some(relative) = input.strip_prefix("now") {
        return parse_relative(relative, now);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    input.parse::<f64>().ok().and_then(from_timestamp)
}

/// Converts epoch seconds (with fraction) to an instant.
pub fn from_timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let micros = ((seconds - whole) * 1_000_000.0).round() as i64;
    DateTime::from_timestamp(whole as i64, 0).map(|dt| dt + Duration::microseconds(micros))
}

/// Converts an instant to epoch seconds with microsecond fraction.
pub fn to_timestamp(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

fn parse_relative(relative: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if relative.is_empty() {
        return Some(now);
    }
    let (sign, rest) = match relative.split_at(1) {
        ("-", rest) => (-1, rest),
        ("+", rest) => (1, rest),
        _ => return None,
    };
    let unit = rest.chars().last()?;
    let amount: i64 = rest[..rest.len() - unit.len_utf8()].parse().ok()?;
    let delta = match unit {
        's' => Duration::seconds(amount),
        'm' => Duration::minutes(amount),
        'h' => Duration::hours(amount),
        'd' => Duration::days(amount),
        'w' => Duration::weeks(amount),
        _ => return None,
    };
    Some(if sign < 0 { now - delta } else { now + delta })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rfc3339_normalizes_to_utc() {
        let dt = parse_datetime("2024-03-01T07:00:00-05:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_date_only() {
        let dt = parse_datetime("2024-03-01").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp() {
        let dt = parse_datetime("1709294400").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(to_timestamp(&dt), 1_709_294_400.0);
        let frac = from_timestamp(1_709_294_400.25).unwrap();
        assert_eq!(frac.timestamp_subsec_micros(), 250_000);
    }

    #[test]
    fn test_relative() {
        let now = fixed_now();
        assert_eq!(parse_datetime_at("now", now), Some(now));
        assert_eq!(
            parse_datetime_at("now-7d", now),
            Some(Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_datetime_at("now+2h", now),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime_at("now-7x", now), None);
        assert_eq!(parse_datetime_at("nowish", now), None);
    }

    #[test]
    fn test_garbage() {
        assert!(parse_datetime("yesterday").is_none());
    }
}
