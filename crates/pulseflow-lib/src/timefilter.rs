//! Optional clock time-of-day restriction.
//!
//! Windows that span midnight (start > end, e.g. 22:00-05:00) are handled by
//! shifting the window bounds and every timestamp forward twelve hours,
//! filtering with a plain same-day comparison, and shifting the surviving
//! timestamps back. The unshift happens strictly after filtering.

use crate::error::ConfigError;
use crate::signal::Recording;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Half-open clock window [start, end), HH:MM resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ClockRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        let range = ClockRange {
            start: parse_clock(start)?,
            end: parse_clock(end)?,
        };
        range.validate()?;
        Ok(range)
    }

    /// True when the window wraps past midnight and needs the shifted path.
    pub fn spans_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spans_midnight() && shift_window(self).spans_midnight() {
            return Err(ConfigError::InvertedTimeRange);
        }
        Ok(())
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::BadClockTime {
        value: value.to_string(),
    })
}

const HALF_DAY: TimeDelta = TimeDelta::hours(12);

/// Move both window bounds forward twelve hours (wrapping at midnight).
fn shift_window(range: &ClockRange) -> ClockRange {
    ClockRange {
        start: range.start + HALF_DAY,
        end: range.end + HALF_DAY,
    }
}

/// Move every timestamp forward twelve hours.
fn shift_timestamps(times: &mut [DateTime<Utc>], delta: TimeDelta) {
    for t in times.iter_mut() {
        *t += delta;
    }
}

/// Restrict a recording to rows whose clock time falls inside the window.
///
/// The range must have passed [`ClockRange::validate`] (done once per run).
/// The result may be empty; callers treat that as an empty-result status for
/// the unit, not an error.
pub fn filter_clock_range(mut recording: Recording, range: &ClockRange) -> Recording {
    debug_assert!(range.validate().is_ok());
    let (window, shifted) = if range.spans_midnight() {
        (shift_window(range), true)
    } else {
        (*range, false)
    };
    if shifted {
        shift_timestamps(&mut recording.times, HALF_DAY);
    }
    let mask: Vec<bool> = recording
        .times
        .iter()
        .map(|t| {
            let clock = t.time();
            clock >= window.start && clock < window.end
        })
        .collect();
    recording.retain_rows(&mask);
    if shifted {
        shift_timestamps(&mut recording.times, -HALF_DAY);
    }
    recording
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn recording_at(clock_times: &[(u32, u32)]) -> Recording {
        let times: Vec<DateTime<Utc>> = clock_times
            .iter()
            .map(|&(h, m)| Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap())
            .collect();
        let n = times.len();
        Recording {
            times,
            channels: BTreeMap::from([(Channel::P0, vec![1.0; n])]),
            ambient: None,
        }
    }

    #[test]
    fn nocturnal_window_keeps_both_sides_of_midnight() {
        let range = ClockRange::parse("22:00", "05:00").unwrap();
        let rec = recording_at(&[(23, 30), (2, 0), (12, 0)]);
        let filtered = filter_clock_range(rec, &range);
        assert_eq!(filtered.len(), 2);
        let clocks: Vec<_> = filtered.times.iter().map(|t| t.time()).collect();
        assert!(clocks.contains(&NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(clocks.contains(&NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
    }

    #[test]
    fn unshifted_timestamps_come_back_unchanged() {
        let range = ClockRange::parse("22:00", "05:00").unwrap();
        let rec = recording_at(&[(23, 30)]);
        let original = rec.times[0];
        let filtered = filter_clock_range(rec, &range);
        assert_eq!(filtered.times[0], original);
    }

    #[test]
    fn daytime_window_takes_the_plain_path() {
        let range = ClockRange::parse("05:00", "22:00").unwrap();
        assert!(!range.spans_midnight());
        let rec = recording_at(&[(4, 59), (5, 0), (12, 0), (21, 59), (22, 0)]);
        let filtered = filter_clock_range(rec, &range);
        // Half-open window: 05:00 in, 22:00 out.
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn window_start_boundary_is_inclusive_after_shift() {
        let range = ClockRange::parse("22:00", "05:00").unwrap();
        let rec = recording_at(&[(22, 0), (5, 0)]);
        let filtered = filter_clock_range(rec, &range);
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered.times[0].time(),
            NaiveTime::from_hms_opt(22, 0, 0).unwrap()
        );
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let range = ClockRange::parse("22:00", "05:00").unwrap();
        let rec = recording_at(&[(12, 0), (13, 0)]);
        let filtered = filter_clock_range(rec, &range);
        assert!(filtered.is_empty());
    }

    #[test]
    fn rejects_malformed_clock_strings() {
        assert!(matches!(
            ClockRange::parse("25:00", "05:00"),
            Err(ConfigError::BadClockTime { .. })
        ));
        assert!(matches!(
            ClockRange::parse("2200", "0500"),
            Err(ConfigError::BadClockTime { .. })
        ));
    }
}
