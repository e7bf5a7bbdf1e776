//! Pulse-to-pulse intervals: derivation from beat timestamps and hard
//! outlier rejection against the physiological band.

use crate::signal::BeatEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One beat with its interval to the preceding beat. The first beat of a
/// sequence has no interval and never becomes a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpiRecord {
    pub time: DateTime<Utc>,
    pub amplitude: f64,
    pub quality: f64,
    /// Gap to the immediately preceding beat, milliseconds.
    pub ppi_ms: f64,
    pub folder: Option<String>,
    pub participant: Option<String>,
}

/// Convert beats into interval records. Input order is not trusted: the
/// beats are sorted by timestamp before differencing.
pub fn compute_ppi(mut beats: Vec<BeatEvent>) -> Vec<PpiRecord> {
    beats.sort_by_key(|b| b.time);
    beats
        .windows(2)
        .map(|pair| {
            let ppi_ms = (pair[1].time - pair[0].time)
                .num_microseconds()
                .map(|us| us as f64 / 1000.0)
                .unwrap_or(f64::MAX);
            PpiRecord {
                time: pair[1].time,
                amplitude: pair[1].amplitude,
                quality: pair[1].quality,
                ppi_ms,
                folder: None,
                participant: None,
            }
        })
        .collect()
}

/// Drop records outside the inclusive [low, high] band. Rejected beats are
/// discarded permanently, never interpolated. Returns the survivors and the
/// number removed.
pub fn clean_ppi(records: Vec<PpiRecord>, low_ms: u32, high_ms: u32) -> (Vec<PpiRecord>, usize) {
    let before = records.len();
    let kept: Vec<PpiRecord> = records
        .into_iter()
        .filter(|r| r.ppi_ms >= low_ms as f64 && r.ppi_ms <= high_ms as f64)
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}
