//! Checked arithmetic on configured second counts
//!
//! Periods, cooldowns, schedule intervals and allocation durations all arrive
//! as unsigned second counts. Registration rejects anything above
//! [`MAX_SPAN_SECS`]; these helpers return `None` rather than overflow when a
//! value or a timestamp near the edge of the calendar slips through anyway.

use chrono::{DateTime, Duration, Utc};

/// Longest accepted period, lookback, cooldown, interval or duration (100 years)
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

pub fn seconds(secs: u64) -> Option<Duration> {
    if secs > MAX_SPAN_SECS {
        return None;
    }
    Duration::try_seconds(i64::try_from(secs).ok()?)
}

/// `start + secs`, or `None` past the representable range
pub fn after(start: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(seconds(secs)?)
}

/// `end - secs`, or `None` past the representable range
pub fn before(end: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    end.checked_sub_signed(seconds(secs)?)
}

/// True once at least `secs` have passed since `since`. A span that cannot be
/// represented never elapses.
pub fn has_elapsed(since: DateTime<Utc>, now: DateTime<Utc>, secs: u64) -> bool {
    seconds(secs).map_or(false, |span| now - since >= span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_out_of_range_spans_are_none() {
        assert_eq!(seconds(90), Some(Duration::seconds(90)));
        assert!(seconds(MAX_SPAN_SECS).is_some());
        assert!(seconds(MAX_SPAN_SECS + 1).is_none());
        assert!(seconds(u64::MAX).is_none());
        assert!(after(now(), 10_000_000_000_000).is_none());
        assert!(before(now(), u64::MAX).is_none());
    }

    #[test]
    fn test_edge_of_calendar() {
        let edge = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        assert!(after(edge, 5).is_some());
        assert!(after(edge, 60).is_none());
    }

    #[test]
    fn test_has_elapsed() {
        let t0 = now();
        assert!(!has_elapsed(t0, t0 + Duration::seconds(299), 300));
        assert!(has_elapsed(t0, t0 + Duration::seconds(300), 300));
        assert!(!has_elapsed(t0, t0 + Duration::days(365_000), u64::MAX));
    }
}
