//! Windowed HRV aggregation.
//!
//! A single left-to-right scan folds an ordered PPI sequence into closed
//! bins: a bin closes when the next record would overrun the window budget,
//! or early when more than one minute separates it from the previous record
//! (a recording discontinuity). Window boundaries therefore drift with the
//! data; they are not calendar-aligned.

use crate::ppi::PpiRecord;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Gap beyond which a bin is closed early regardless of remaining budget.
const DISCONTINUITY: TimeDelta = TimeDelta::minutes(1);

/// The nine per-window scalars. NaN-filled when a degenerate bin is
/// evaluated directly (the scan itself never emits single-record bins).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HrvSummary {
    pub mean_nn: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub sdsd: f64,
    pub cvnn: f64,
    pub cvsd: f64,
    pub median_nn: f64,
    pub num_data_points: usize,
    pub mean_quality: f64,
}

/// One emitted window: summary plus the bin's actual time extent and any
/// provenance tags added by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetrics {
    #[serde(flatten)]
    pub summary: HrvSummary,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub folder: Option<String>,
    pub participant: Option<String>,
}

/// Column-wise mean of a channel's windows (NaN-propagating).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub mean_nn: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub sdsd: f64,
    pub cvnn: f64,
    pub cvsd: f64,
    pub median_nn: f64,
    pub num_data_points: f64,
    pub mean_quality: f64,
}

/// Evaluate the metric formulas over one bin's intervals and qualities.
/// Fewer than two intervals leaves every statistic undefined.
pub fn hrv_summary(ppi_ms: &[f64], quality: &[f64]) -> HrvSummary {
    if ppi_ms.len() < 2 {
        return HrvSummary {
            mean_nn: f64::NAN,
            sdnn: f64::NAN,
            rmssd: f64::NAN,
            sdsd: f64::NAN,
            cvnn: f64::NAN,
            cvsd: f64::NAN,
            median_nn: f64::NAN,
            num_data_points: ppi_ms.len(),
            mean_quality: f64::NAN,
        };
    }

    let mean_nn = mean(ppi_ms);
    let sdnn = sample_std(ppi_ms);
    let diffs: Vec<f64> = ppi_ms.windows(2).map(|w| w[1] - w[0]).collect();
    let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt();
    let sdsd = sample_std(&diffs);

    HrvSummary {
        mean_nn,
        sdnn,
        rmssd,
        sdsd,
        cvnn: if mean_nn != 0.0 { sdnn / mean_nn } else { f64::NAN },
        cvsd: if mean_nn != 0.0 { rmssd / mean_nn } else { f64::NAN },
        median_nn: median(ppi_ms),
        num_data_points: ppi_ms.len(),
        mean_quality: mean(quality),
    }
}

struct Bin<'a> {
    start: DateTime<Utc>,
    rows: Vec<&'a PpiRecord>,
}

impl<'a> Bin<'a> {
    fn open(record: &'a PpiRecord) -> Self {
        Self {
            start: record.time,
            rows: vec![record],
        }
    }

    fn last_time(&self) -> DateTime<Utc> {
        self.rows.last().expect("bin is never empty").time
    }

    /// A bin only yields a window when it holds more than one record; a lone
    /// beat has no successive difference to aggregate.
    fn close(self) -> Option<WindowMetrics> {
        if self.rows.len() < 2 {
            return None;
        }
        let ppi: Vec<f64> = self.rows.iter().map(|r| r.ppi_ms).collect();
        let quality: Vec<f64> = self.rows.iter().map(|r| r.quality).collect();
        Some(WindowMetrics {
            summary: hrv_summary(&ppi, &quality),
            start_time: self.start,
            end_time: self.last_time(),
            folder: None,
            participant: None,
        })
    }
}

/// Fold time-ordered PPI records into windows of at most `window_minutes`,
/// splitting early at recording discontinuities.
pub fn window_hrv(records: &[PpiRecord], window_minutes: u32) -> Vec<WindowMetrics> {
    let budget = TimeDelta::minutes(window_minutes as i64);
    let mut out = Vec::new();
    let mut bin: Option<Bin> = None;

    for record in records {
        let Some(current) = bin.as_mut() else {
            bin = Some(Bin::open(record));
            continue;
        };
        if record.time - current.start <= budget {
            if record.time - current.last_time() > DISCONTINUITY {
                // Discontinuity: close early even though budget remains.
                out.extend(bin.take().and_then(Bin::close));
                bin = Some(Bin::open(record));
            } else {
                current.rows.push(record);
            }
        } else {
            // Budget exhausted.
            out.extend(bin.take().and_then(Bin::close));
            bin = Some(Bin::open(record));
        }
    }
    out.extend(bin.take().and_then(Bin::close));
    out
}

/// NaN-propagating column mean across all windows. None when there are no
/// windows to summarise.
pub fn overall_metrics(windows: &[WindowMetrics]) -> Option<OverallMetrics> {
    if windows.is_empty() {
        return None;
    }
    let n = windows.len() as f64;
    let mut acc = OverallMetrics {
        mean_nn: 0.0,
        sdnn: 0.0,
        rmssd: 0.0,
        sdsd: 0.0,
        cvnn: 0.0,
        cvsd: 0.0,
        median_nn: 0.0,
        num_data_points: 0.0,
        mean_quality: 0.0,
    };
    for w in windows {
        acc.mean_nn += w.summary.mean_nn;
        acc.sdnn += w.summary.sdnn;
        acc.rmssd += w.summary.rmssd;
        acc.sdsd += w.summary.sdsd;
        acc.cvnn += w.summary.cvnn;
        acc.cvsd += w.summary.cvsd;
        acc.median_nn += w.summary.median_nn;
        acc.num_data_points += w.summary.num_data_points as f64;
        acc.mean_quality += w.summary.mean_quality;
    }
    acc.mean_nn /= n;
    acc.sdnn /= n;
    acc.rmssd /= n;
    acc.sdsd /= n;
    acc.cvnn /= n;
    acc.cvsd /= n;
    acc.median_nn /= n;
    acc.num_data_points /= n;
    acc.mean_quality /= n;
    Some(acc)
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (Bessel's correction).
fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let m = mean(data);
    (data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() as f64 - 1.0)).sqrt()
}

fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("PPI values are finite"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
