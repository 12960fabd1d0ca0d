//! Storage query types
//!
//! - `StoredReading`: a reading plus the time the relay received it
//! - `TimeRange`: a half-open interval of receipt times

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::telemetry::Reading;

/// A persisted reading
///
/// Queries filter and order on `received_at` (relay clock), never on the
/// controller-supplied `reading.timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

/// Time range for reading queries, `[start, end)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range covering `duration` up to `end`
    pub fn ending_at(end: DateTime<Utc>, duration: Duration) -> Self {
        let end = end.timestamp_millis();
        Self {
            start: end - duration.num_milliseconds(),
            end,
        }
    }

    /// Create a range for the last N hours from now
    pub fn last_hours(hours: i64) -> Self {
        Self::ending_at(Utc::now(), Duration::hours(hours))
    }

    /// Create a range for the last N days from now
    pub fn last_days(days: i64) -> Self {
        Self::last_hours(days * 24)
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start).single()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.end).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_new_rejects_empty() {
        assert!(TimeRange::try_new(10, 10).is_none());
        assert!(TimeRange::try_new(11, 10).is_none());
        assert!(TimeRange::try_new(10, 11).is_some());
    }

    #[test]
    fn test_contains_half_open() {
        let range = TimeRange::try_new(100, 200).unwrap();
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
    }

    #[test]
    fn test_last_days_span() {
        let range = TimeRange::last_days(7);
        assert_eq!(range.end - range.start, 7 * 24 * 3600 * 1000);
    }
}
