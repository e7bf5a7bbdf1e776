//! Run orchestration: single file, directory of epochs, or participant
//! batches. All three variants feed leaf recording units through the same
//! pipeline; this module only differs in how units are discovered and how
//! their outputs are merged.
//!
//! Merging is strictly sequential. Each unit owns its tables until they are
//! appended to the per-channel accumulators, so no locking is needed.

use crate::config::{Channel, ProcessingConfig};
use crate::detectors::PeakDetector;
use crate::error::RunError;
use crate::io::raw::RAW_FILE_NAME;
use crate::metrics::hrv::{overall_metrics, window_hrv, WindowMetrics};
use crate::pipeline::{process_recording_unit, ChannelOutput, RunResults};
use crate::ppi::PpiRecord;
use crate::worker::RunContext;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What a run processes. The three variants share the leaf pipeline and
/// differ only in unit discovery.
#[derive(Debug, Clone)]
pub enum RunTarget {
    /// One raw file.
    SingleFile(PathBuf),
    /// A directory whose numeric-named subdirectories are recording epochs.
    Directory(PathBuf),
    /// A directory of participant folders, each holding epoch subdirectories.
    ParticipantBatch(PathBuf),
}

pub fn run(
    target: &RunTarget,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<RunResults, RunError> {
    config.validate()?;
    match target {
        RunTarget::SingleFile(path) => run_single_file(path, config, detector, ctx),
        RunTarget::Directory(path) => run_directory(path, config, detector, ctx),
        RunTarget::ParticipantBatch(path) => run_batch(path, config, detector, ctx),
    }
}

fn run_single_file(
    path: &Path,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<RunResults, RunError> {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let Some(unit) = process_recording_unit(path, None, &label, config, detector, ctx)? else {
        return Ok(RunResults::default());
    };
    ctx.progress(100);
    Ok(finalize(unit, config, ctx))
}

fn run_directory(
    path: &Path,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<RunResults, RunError> {
    let epochs = epoch_folders(path)?;
    if epochs.is_empty() {
        return Err(RunError::NoEpochs {
            path: path.to_path_buf(),
        });
    }
    ctx.status(format!("Found {} folders to process", epochs.len()));
    let merged = collect_epochs(&epochs, config, detector, ctx, true);
    Ok(finalize(merged, config, ctx))
}

fn run_batch(
    path: &Path,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<RunResults, RunError> {
    let participants = subdirectories(path)?;
    if participants.is_empty() {
        return Err(RunError::NoParticipants {
            path: path.to_path_buf(),
        });
    }
    ctx.status(format!(
        "Found {} participant folders to process",
        participants.len()
    ));

    let mut ppi: BTreeMap<Channel, Vec<PpiRecord>> = BTreeMap::new();
    let mut windows: BTreeMap<Channel, Vec<WindowMetrics>> = BTreeMap::new();

    for (i, participant) in participants.iter().enumerate() {
        if ctx.stopped() {
            ctx.status("Processing stopped by user");
            break;
        }
        let id = folder_name(participant);
        ctx.status(format!(
            "Processing participant: {} ({}/{})",
            id,
            i + 1,
            participants.len()
        ));
        ctx.progress((i * 100 / participants.len()) as u8);

        let channels = match process_participant(participant, config, detector, ctx) {
            Ok(channels) => channels,
            Err(err) => {
                ctx.status(format!("Error processing participant {}: {}", id, err));
                continue;
            }
        };
        for mut output in channels {
            for record in &mut output.ppi {
                record.participant = Some(id.clone());
            }
            for window in &mut output.windows {
                window.participant = Some(id.clone());
            }
            ppi.entry(output.channel).or_default().extend(output.ppi);
            windows
                .entry(output.channel)
                .or_default()
                .extend(output.windows);
        }
    }

    let mut results = RunResults::default();
    for &channel in &config.channels {
        let mut records = ppi.remove(&channel).unwrap_or_default();
        records.sort_by_key(|r| r.time);
        let channel_windows = windows.remove(&channel).unwrap_or_default();
        let overall = if config.calculate_hrv {
            ctx.status(format!("Calculating overall HRV metrics for {}...", channel));
            overall_metrics(&channel_windows)
        } else {
            None
        };
        results.channels.push(ChannelOutput {
            channel,
            ppi: records,
            windows: channel_windows,
            overall,
        });
    }
    Ok(results)
}

/// Directory mode for one participant: epoch discovery failures become unit
/// errors for the batch loop above, not run failures.
fn process_participant(
    participant: &Path,
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
) -> Result<Vec<ChannelOutput>, RunError> {
    let epochs = epoch_folders(participant)?;
    if epochs.is_empty() {
        return Err(RunError::NoEpochs {
            path: participant.to_path_buf(),
        });
    }
    ctx.status(format!(
        "Found {} sessions for participant {}",
        epochs.len(),
        folder_name(participant)
    ));
    let merged = collect_epochs(&epochs, config, detector, ctx, false);
    Ok(finalize(merged, config, ctx).channels)
}

/// Run the unit pipeline over each epoch folder, tagging records with the
/// epoch folder name. Unit failures are reported and skipped.
fn collect_epochs(
    epochs: &[PathBuf],
    config: &ProcessingConfig,
    detector: &dyn PeakDetector,
    ctx: &RunContext,
    emit_progress: bool,
) -> BTreeMap<Channel, Vec<PpiRecord>> {
    let mut merged: BTreeMap<Channel, Vec<PpiRecord>> = BTreeMap::new();
    for (i, epoch) in epochs.iter().enumerate() {
        if ctx.stopped() {
            ctx.status("Processing stopped by user");
            break;
        }
        if emit_progress {
            ctx.progress((i * 100 / epochs.len()) as u8);
        }
        let folder = folder_name(epoch);
        let raw_file = epoch.join(RAW_FILE_NAME);
        if !raw_file.exists() {
            ctx.status(format!(
                "No {} found in {}, skipping",
                RAW_FILE_NAME,
                epoch.display()
            ));
            continue;
        }
        ctx.status(format!("Processing {}", raw_file.display()));
        match process_recording_unit(&raw_file, Some(epoch), &folder, config, detector, ctx) {
            Ok(Some(unit)) => {
                for (channel, mut records) in unit {
                    for record in &mut records {
                        record.folder = Some(folder.clone());
                    }
                    merged.entry(channel).or_default().extend(records);
                }
            }
            Ok(None) => {}
            Err(err) => {
                ctx.status(format!("Error processing {}: {}", epoch.display(), err));
            }
        }
    }
    merged
}

/// Sort each channel's merged records, window them once across the whole
/// span so windows may cross epoch boundaries, and derive overall metrics.
fn finalize(
    mut merged: BTreeMap<Channel, Vec<PpiRecord>>,
    config: &ProcessingConfig,
    ctx: &RunContext,
) -> RunResults {
    let mut results = RunResults::default();
    for &channel in &config.channels {
        let mut records = merged.remove(&channel).unwrap_or_default();
        records.sort_by_key(|r| r.time);

        let (windows, overall) = if config.calculate_hrv && !records.is_empty() {
            ctx.status(format!(
                "Calculating HRV metrics for {} on combined data...",
                channel
            ));
            let mut windows = window_hrv(&records, config.window_minutes);
            backfill_folders(&mut windows, &records);
            ctx.status(format!(
                "Calculated HRV metrics for {} windows",
                windows.len()
            ));
            let overall = overall_metrics(&windows);
            (windows, overall)
        } else {
            (Vec::new(), None)
        };

        results.channels.push(ChannelOutput {
            channel,
            ppi: records,
            windows,
            overall,
        });
    }
    results
}

/// Give each window the folder of the PPI record nearest its start time.
fn backfill_folders(windows: &mut [WindowMetrics], records: &[PpiRecord]) {
    if records.iter().all(|r| r.folder.is_none()) {
        return;
    }
    for window in windows.iter_mut() {
        let nearest = records.iter().min_by_key(|r| {
            (r.time - window.start_time)
                .num_milliseconds()
                .unsigned_abs()
        });
        if let Some(record) = nearest {
            window.folder = record.folder.clone();
        }
    }
}

/// Immediate numeric-named subdirectories, sorted by name: the epoch layout
/// produced by the recording devices.
fn epoch_folders(path: &Path) -> Result<Vec<PathBuf>, RunError> {
    let subdirs = subdirectories(path)?;
    Ok(subdirs
        .into_iter()
        .filter(|p| {
            let name = folder_name(p);
            !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
        })
        .collect())
}

fn subdirectories(path: &Path) -> Result<Vec<PathBuf>, RunError> {
    let entries = std::fs::read_dir(path).map_err(|source| {
        RunError::Unit(crate::error::UnitError::Read {
            path: path.to_path_buf(),
            source,
        })
    })?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ElgendiDetector;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    /// Absolute-encoded synthetic epoch: pulses every `period_s` for
    /// `seconds`, starting at `start_epoch`.
    fn write_epoch(dir: &Path, start_epoch: i64, period_s: f64, seconds: f64) {
        let fs = 25.0;
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
            let v = 1000.0 + 400.0 * pulse;
            body.push_str(&format!("{},{},{},{},0\n", col0, v, v, v));
        }
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(RAW_FILE_NAME), body).unwrap();
    }

    fn p0_config() -> ProcessingConfig {
        ProcessingConfig {
            channels: vec![Channel::P0],
            ..ProcessingConfig::default()
        }
    }

    #[test]
    fn directory_windows_span_epoch_boundaries() {
        let root = tempdir().unwrap();
        // Two epochs ten seconds apart: close enough that the gap rule does
        // not split, so one window may cover records from both folders.
        write_epoch(&root.path().join("001"), 1_700_000_000, 0.8, 60.0);
        write_epoch(&root.path().join("002"), 1_700_000_070, 0.8, 60.0);
        let ctx = RunContext::detached();
        let results = run(
            &RunTarget::Directory(root.path().to_path_buf()),
            &p0_config(),
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();

        let p0 = &results.channels[0];
        let folders: std::collections::BTreeSet<_> = p0
            .ppi
            .iter()
            .filter_map(|r| r.folder.clone())
            .collect();
        assert_eq!(folders.len(), 2);
        assert!(!p0.windows.is_empty());
        assert!(p0.windows.iter().all(|w| w.folder.is_some()));
        // Windowing ran on the concatenated sequence: some window covers
        // both epochs (70 s apart, inside one five-minute budget; the 10 s
        // inter-epoch gap is under the one-minute discontinuity limit).
        let spanning = p0.windows.iter().any(|w| {
            w.start_time < Utc.timestamp_opt(1_700_000_060, 0).unwrap()
                && w.end_time > Utc.timestamp_opt(1_700_000_070, 0).unwrap()
        });
        assert!(spanning);
        assert!(p0.overall.is_some());
    }

    #[test]
    fn non_numeric_folders_are_not_epochs() {
        let root = tempdir().unwrap();
        write_epoch(&root.path().join("001"), 1_700_000_000, 0.8, 60.0);
        fs::create_dir_all(root.path().join("notes")).unwrap();
        let ctx = RunContext::detached();
        let results = run(
            &RunTarget::Directory(root.path().to_path_buf()),
            &p0_config(),
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();
        let folders: std::collections::BTreeSet<_> = results.channels[0]
            .ppi
            .iter()
            .filter_map(|r| r.folder.clone())
            .collect();
        assert_eq!(folders.into_iter().collect::<Vec<_>>(), vec!["001"]);
    }

    #[test]
    fn empty_directory_is_a_run_error() {
        let root = tempdir().unwrap();
        let ctx = RunContext::detached();
        let err = run(
            &RunTarget::Directory(root.path().to_path_buf()),
            &p0_config(),
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::NoEpochs { .. }));
    }

    #[test]
    fn bad_epoch_is_skipped_and_the_rest_survive() {
        let root = tempdir().unwrap();
        write_epoch(&root.path().join("001"), 1_700_000_000, 0.8, 60.0);
        let bad = root.path().join("002");
        fs::create_dir_all(&bad).unwrap();
        // Unclassifiable first column: between the delta and anchor ranges.
        fs::write(bad.join(RAW_FILE_NAME), "20000,1,2,3,0\n20001,1,2,3,0\n").unwrap();
        let ctx = RunContext::detached();
        let results = run(
            &RunTarget::Directory(root.path().to_path_buf()),
            &p0_config(),
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();
        assert!(!results.channels[0].ppi.is_empty());
    }

    #[test]
    fn participant_without_valid_epochs_does_not_abort_batch() {
        let root = tempdir().unwrap();
        // sub-a has no epoch folders at all.
        fs::create_dir_all(root.path().join("sub-a")).unwrap();
        write_epoch(&root.path().join("sub-b/001"), 1_700_000_000, 0.8, 90.0);
        let ctx = RunContext::detached();
        let results = run(
            &RunTarget::ParticipantBatch(root.path().to_path_buf()),
            &p0_config(),
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();
        let p0 = &results.channels[0];
        assert!(!p0.ppi.is_empty());
        assert!(p0
            .ppi
            .iter()
            .all(|r| r.participant.as_deref() == Some("sub-b")));
        assert!(p0
            .windows
            .iter()
            .all(|w| w.participant.as_deref() == Some("sub-b")));
        assert!(p0.overall.is_some());
    }

    #[test]
    fn skip_hrv_leaves_windows_empty() {
        let root = tempdir().unwrap();
        write_epoch(&root.path().join("001"), 1_700_000_000, 0.8, 60.0);
        let config = ProcessingConfig {
            calculate_hrv: false,
            ..p0_config()
        };
        let ctx = RunContext::detached();
        let results = run(
            &RunTarget::Directory(root.path().to_path_buf()),
            &config,
            &ElgendiDetector::default(),
            &ctx,
        )
        .unwrap();
        let p0 = &results.channels[0];
        assert!(!p0.ppi.is_empty());
        assert!(p0.windows.is_empty());
        assert!(p0.overall.is_none());
    }
}
