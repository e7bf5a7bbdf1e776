//! The per-recording-unit pipeline: ingestion, optional time-of-day
//! restriction, sampling-rate estimation, conditioning, peak extraction, and
//! PPI cleaning. Every run mode feeds its leaf units through this path.

use crate::config::{Channel, ProcessingConfig};
use crate::detectors::PeakDetector;
use crate::error::UnitError;
use crate::filter::condition_channel;
use crate::io::raw::read_ppg_csv;
use crate::metrics::hrv::{OverallMetrics, WindowMetrics};
use crate::ppi::{clean_ppi, compute_ppi, PpiRecord};
use crate::signal::{estimate_sampling_rate, BeatEvent};
use crate::timefilter::filter_clock_range;
use crate::worker::RunContext;
use std::collections::BTreeMap;
use std::path::Path;

/// Everything produced for one channel over a whole run.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    pub channel: Channel,
    pub ppi: Vec<PpiRecord>,
    pub windows: Vec<WindowMetrics>,
    pub overall: Option<OverallMetrics>,
}

/// Final output of a run, one entry per processed channel.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    pub channels: Vec<ChannelOutput>,
}

/// Cleaned PPI records per channel for one recording unit. `None` means the
/// unit had no samples inside the configured time range (a skip, not a
/// failure).
pub type UnitPpi = BTreeMap<Channel, Vec<PpiRecord>>;

/// Run the signal-to-PPI pipeline on one raw file.
///
/// `label` identifies the unit in status messages (folder name or file name).
pub fn process_recording_unit(
    file: &Path,
    sidecar_dir: Option<&Path>,
    label: &str,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<Option<UnitPpi>, UnitError> {
    ctx.status(format!("Reading PPG file: {}", file.display()));
    let mut recording = read_ppg_csv(file, sidecar_dir, config.encoding)?;
    if recording.is_empty() {
        return Err(UnitError::EmptyRecording);
    }

    if let Some(range) = &config.time_range {
        recording = filter_clock_range(recording, range);
        if recording.is_empty() {
            ctx.status(format!(
                "No data points in selected time range: {}-{}",
                range.start.format("%H:%M"),
                range.end.format("%H:%M")
            ));
            return Ok(None);
        }
    }

    let fs = estimate_sampling_rate(&recording.times)?;
    ctx.status(format!("Average sampling rate: {:.2} Hz", fs));

    let mut output = UnitPpi::new();
    for &channel in &config.channels {
        let Some(raw) = recording.channels.get(&channel) else {
            ctx.status(format!("Channel {} not found in {}", channel, label));
            continue;
        };
        let filtered = condition_channel(raw, recording.ambient.as_deref(), fs)?;
        let detection = detector.detect(&filtered, fs as u32);

        let beats: Vec<BeatEvent> = detection
            .peak_indices()
            .into_iter()
            .map(|i| BeatEvent {
                time: recording.times[i],
                amplitude: filtered[i],
                quality: detection.quality[i],
            })
            .collect();

        let records = compute_ppi(beats);
        let (records, removed) = clean_ppi(records, config.ppi_low_ms, config.ppi_high_ms);
        ctx.status(format!(
            "Removed {} outlier PPI values from {} ({})",
            removed, label, channel
        ));
        output.insert(channel, records);
    }
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ElgendiDetector;
    use crate::timefilter::ClockRange;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Write a raw absolute-encoded recording: gaussian pulses at `period_s`
    /// over `seconds`, sampled at `fs`, anchors on the first and last row.
    fn write_recording(path: &PathBuf, start_epoch: i64, fs: f64, period_s: f64, seconds: f64) {
        let n = (fs * seconds) as usize;
        let mut beats = Vec::new();
        let mut t = 0.5;
        while t < seconds - 0.5 {
            beats.push(t);
            t += period_s;
        }
        let mut body = String::new();
        for i in 0..n {
            let time = i as f64 / fs;
            let pulse: f64 = beats
                .iter()
                .map(|&bt| (-0.5 * ((time - bt) / 0.04).powi(2)).exp())
                .sum();
            let col0 = if i == 0 {
                start_epoch as f64
            } else if i == n - 1 {
                start_epoch as f64 + seconds
            } else {
                0.0
            };
            let value = 1000.0 + 400.0 * pulse;
            body.push_str(&format!("{},{},{},{},0\n", col0, value, value, value));
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn unit_pipeline_produces_in_band_ppi() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ppg.csv");
        write_recording(&file, 1_700_000_000, 25.0, 0.8, 120.0);
        let config = ProcessingConfig::default();
        let ctx = RunContext::detached();
        let result = process_recording_unit(
            &file,
            None,
            "test",
            &config,
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap()
        .expect("unit not empty");

        let p0 = &result[&Channel::P0];
        assert!(p0.len() > 100, "expected many beats, got {}", p0.len());
        assert!(p0
            .iter()
            .all(|r| r.ppi_ms >= 667.0 && r.ppi_ms <= 2000.0));
        // Beats arrive every 0.8 s.
        let mean_ppi = p0.iter().map(|r| r.ppi_ms).sum::<f64>() / p0.len() as f64;
        assert!((mean_ppi - 800.0).abs() < 50.0, "mean PPI {}", mean_ppi);
    }

    #[test]
    fn out_of_range_unit_is_a_skip_not_an_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ppg.csv");
        // 1700000000 is 2023-11-14 22:13:20 UTC.
        write_recording(&file, 1_700_000_000, 25.0, 0.8, 60.0);
        let config = ProcessingConfig {
            time_range: Some(ClockRange::parse("09:00", "10:00").unwrap()),
            ..ProcessingConfig::default()
        };
        let ctx = RunContext::detached();
        let result = process_recording_unit(
            &file,
            None,
            "test",
            &config,
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn unreadable_file_is_a_unit_error() {
        let config = ProcessingConfig::default();
        let ctx = RunContext::detached();
        let missing = PathBuf::from("/no/such/ppg.csv");
        assert!(process_recording_unit(
            &missing,
            None,
            "test",
            &config,
            &ElgendiDetector::default(),
            &ctx,
        )
        .is_err());
    }
}
