//! Timestamp helpers.
//!
//! Every timestamp the store writes is a `DateTime<Utc>`. Snapshots written by
//! older tools may carry naive ISO-8601 strings without an offset; those are
//! read as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Type alias for the timestamps used throughout the store.
pub type NodeDateTime = DateTime<Utc>;

/// Parse an ISO-8601 instant, accepting RFC 3339 as well as the naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` form (interpreted as UTC).
pub fn parse_datetime(text: &str) -> Option<NodeDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Parse a calendar date (`YYYY-MM-DD`). A full instant is accepted and
/// truncated to its date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(text).map(|dt| dt.date_naive()))
}

pub fn from_epoch_millis(millis: i64) -> Option<NodeDateTime> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_forms() {
        let with_offset = parse_datetime("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2024-03-01T08:00:00+00:00");

        let naive = parse_datetime("2024-03-01T10:00:00.123456").unwrap();
        assert_eq!(naive.timestamp_subsec_micros(), 123_456);

        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn test_parse_date_truncates_instants() {
        let date = parse_date("2024-03-01T23:59:59+00:00").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(parse_date("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29));
    }
}
