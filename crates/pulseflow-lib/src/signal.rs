use crate::config::Channel;
use crate::error::UnitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recording unit after timestamp reconstruction: a time-indexed table
/// with up to three PPG channels and an optional ambient-light column.
#[derive(Debug, Clone)]
pub struct Recording {
    pub times: Vec<DateTime<Utc>>,
    pub channels: BTreeMap<Channel, Vec<f64>>,
    pub ambient: Option<Vec<f64>>,
}

impl Recording {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Keep only the rows whose mask entry is true, across every column.
    pub fn retain_rows(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.times.len());
        let mut keep = mask.iter().copied();
        self.times.retain(|_| keep.next().unwrap_or(false));
        for column in self.channels.values_mut() {
            let mut keep = mask.iter().copied();
            column.retain(|_| keep.next().unwrap_or(false));
        }
        if let Some(ambient) = self.ambient.as_mut() {
            let mut keep = mask.iter().copied();
            ambient.retain(|_| keep.next().unwrap_or(false));
        }
    }
}

/// One detected heartbeat on a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatEvent {
    pub time: DateTime<Utc>,
    /// Filtered channel amplitude at the peak sample.
    pub amplitude: f64,
    /// Detector-defined continuous quality score.
    pub quality: f64,
}

/// Estimate the sampling rate from successive timestamp differences.
///
/// Differences of 10 s or more are treated as recording pauses and discarded;
/// the rate is the reciprocal of the mean of what remains.
pub fn estimate_sampling_rate(times: &[DateTime<Utc>]) -> Result<f64, UnitError> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for pair in times.windows(2) {
        let dt = (pair[1] - pair[0])
            .num_microseconds()
            .map(|us| us as f64 / 1e6)
            .unwrap_or(f64::MAX);
        if dt < 10.0 {
            sum += dt;
            count += 1;
        }
    }
    if count == 0 {
        return Err(UnitError::UnusableSamplingRate);
    }
    let mean = sum / count as f64;
    if mean <= 0.0 {
        return Err(UnitError::UnusableSamplingRate);
    }
    Ok(1.0 / mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn sampling_rate_from_uniform_spacing() {
        let times: Vec<_> = (0..100).map(|i| at_ms(i * 20)).collect();
        let fs = estimate_sampling_rate(&times).unwrap();
        assert!((fs - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sampling_rate_ignores_recording_pauses() {
        // 10 samples at 20 ms, a 60 s pause, then 10 more at 20 ms.
        let mut times: Vec<_> = (0..10).map(|i| at_ms(i * 20)).collect();
        let resume = 9 * 20 + 60_000;
        times.extend((0..10).map(|i| at_ms(resume + i * 20)));
        let fs = estimate_sampling_rate(&times).unwrap();
        assert!((fs - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sampling_rate_fails_when_only_pauses_remain() {
        let times = vec![at_ms(0), at_ms(20_000), at_ms(40_000)];
        assert!(matches!(
            estimate_sampling_rate(&times),
            Err(UnitError::UnusableSamplingRate)
        ));
    }

    #[test]
    fn retain_rows_drops_across_all_columns() {
        let mut rec = Recording {
            times: vec![at_ms(0), at_ms(20), at_ms(40)],
            channels: BTreeMap::from([(Channel::P0, vec![1.0, 2.0, 3.0])]),
            ambient: Some(vec![0.1, 0.2, 0.3]),
        };
        rec.retain_rows(&[true, false, true]);
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.channels[&Channel::P0], vec![1.0, 3.0]);
        assert_eq!(rec.ambient.as_deref(), Some(&[0.1, 0.3][..]));
    }
}
