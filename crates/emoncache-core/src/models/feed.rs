use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single feed sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("Invalid date range: start {start} is after end {end}")]
    StartAfterEnd {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid date range: {duration} before {end} is out of range")]
    OutOfRange { duration: Duration, end: DateTime<Utc> },
}

/// Closed time window shown by a page. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// The window of length `duration` ending at `now`.
    pub fn last(duration: Duration, now: DateTime<Utc>) -> Result<Self, DateRangeError> {
        let duration = if duration < Duration::zero() {
            -duration
        } else {
            duration
        };
        let start = now
            .checked_sub_signed(duration)
            .ok_or(DateRangeError::OutOfRange { duration, end: now })?;
        Ok(Self { start, end: now })
    }

    pub fn relative(range: RelativeRange, now: DateTime<Utc>) -> Result<Self, DateRangeError> {
        Self::last(range.duration(), now)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Inclusive on both ends.
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Preset windows offered by the app pages, always anchored at "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativeRange {
    Hour8,
    Day,
    Week,
    Month,
    Year,
}

impl RelativeRange {
    pub fn duration(&self) -> Duration {
        match self {
            RelativeRange::Hour8 => Duration::hours(8),
            RelativeRange::Day => Duration::days(1),
            RelativeRange::Week => Duration::weeks(1),
            RelativeRange::Month => Duration::days(30),
            RelativeRange::Year => Duration::days(365),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RelativeRange::Hour8 => "8 h",
            RelativeRange::Day => "D",
            RelativeRange::Week => "W",
            RelativeRange::Month => "M",
            RelativeRange::Year => "Y",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_date_range_rejects_start_after_end() {
        assert!(DateRange::new(at(10), at(5)).is_err());
        assert!(DateRange::new(at(5), at(5)).is_ok());
    }

    #[test]
    fn test_date_range_contains_is_inclusive() {
        let range = DateRange::new(at(50), at(150)).unwrap();
        assert!(range.contains(at(50)));
        assert!(range.contains(at(150)));
        assert!(!range.contains(at(10)));
        assert!(!range.contains(at(151)));
    }

    #[test]
    fn test_relative_range_ends_now() {
        let now = at(1_000_000);
        let range = DateRange::relative(RelativeRange::Day, now).unwrap();
        assert_eq!(range.end(), now);
        assert_eq!(range.duration(), Duration::days(1));
    }

    #[test]
    fn test_last_with_negative_duration_still_ordered() {
        let now = at(1_000);
        let range = DateRange::last(Duration::seconds(-100), now).unwrap();
        assert!(range.start() <= range.end());
        assert_eq!(range.start(), at(900));
    }

    #[test]
    fn test_last_rejects_window_before_representable_time() {
        let now = at(1_000);
        let huge = Duration::try_days(200_000_000).unwrap();
        assert!(matches!(
            DateRange::last(huge, now),
            Err(DateRangeError::OutOfRange { end, .. }) if end == now
        ));
    }
}
