//! Time-filter string parsing for the query boundary.

use std::time::{SystemTime, UNIX_EPOCH};

/// Parse a time filter string into a Unix timestamp.
///
/// Accepts either a raw Unix timestamp (`"1700000000"`) or a relative
/// duration of the form `<n><unit>` where unit is one of `minute`, `hour`,
/// `day`, `week`, or `month` (30 days), e.g. `"1day"` or `"2week"`.
/// Returns `None` for anything else.
pub fn parse_time_filter(time_str: &str) -> Option<i64> {
    if time_str.is_empty() {
        return None;
    }

    if let Ok(ts) = time_str.parse::<i64>() {
        return Some(ts);
    }

    const UNITS: [(&str, i64); 5] = [
        ("minute", 60),
        ("hour", 3_600),
        ("day", 86_400),
        ("week", 604_800),
        ("month", 2_592_000),
    ];

    for (unit, seconds) in UNITS {
        if let Some(count) = time_str.strip_suffix(unit) {
            if let Ok(n) = count.parse::<i64>() {
                return Some(unix_now() - n * seconds);
            }
        }
    }

    tracing::warn!(filter = time_str, "invalid time filter format");
    None
}

/// Current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_timestamp_passes_through() {
        assert_eq!(parse_time_filter("1700000000"), Some(1_700_000_000));
        assert_eq!(parse_time_filter("0"), Some(0));
    }

    #[test]
    fn relative_durations_subtract_from_now() {
        let now = unix_now();
        let one_day = parse_time_filter("1day").unwrap();
        assert!((now - 86_400 - one_day).abs() <= 2);

        let two_weeks = parse_time_filter("2week").unwrap();
        assert!((now - 2 * 604_800 - two_weeks).abs() <= 2);
    }

    #[test]
    fn invalid_formats_return_none() {
        assert_eq!(parse_time_filter(""), None);
        assert_eq!(parse_time_filter("yesterday"), None);
        assert_eq!(parse_time_filter("day"), None);
        assert_eq!(parse_time_filter("xmonth"), None);
    }
}
