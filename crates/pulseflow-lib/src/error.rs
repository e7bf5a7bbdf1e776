use std::path::PathBuf;
use thiserror::Error;

/// Failures scoped to one recording unit (file or epoch folder). The
/// aggregator reports these and moves on to the next unit.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} has {columns} columns, expected at least 5")]
    ColumnCount { path: PathBuf, columns: usize },
    #[error("{path} row {row}: {value:?} is not a number")]
    BadNumber {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("{path} does not match a supported timestamp encoding")]
    UnrecognizedEncoding { path: PathBuf },
    #[error("cannot find start_time in info.txt for {path}")]
    MissingStartTime { path: PathBuf },
    #[error("no data found in the file")]
    EmptyRecording,
    #[error("unable to estimate sampling rate from timestamps")]
    UnusableSamplingRate,
    #[error("recording too short to filter ({samples} samples)")]
    RecordingTooShort { samples: usize },
    #[error("bandpass filter design failed for sampling rate {fs} Hz")]
    FilterDesign { fs: f64 },
}

/// Configuration problems, rejected before any data is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid clock time {value:?}, expected HH:MM")]
    BadClockTime { value: String },
    #[error("time range start must precede end after midnight adjustment")]
    InvertedTimeRange,
    #[error("window size must be at least one minute")]
    WindowTooSmall,
    #[error("channel set must not be empty")]
    NoChannels,
    #[error("PPI threshold band is empty ({low_ms}ms >= {high_ms}ms)")]
    EmptyPpiBand { low_ms: u32, high_ms: u32 },
    #[error("unknown channel {value:?}")]
    UnknownChannel { value: String },
    #[error("unknown raw encoding {value:?}, expected \"absolute\" or \"delta\"")]
    UnknownEncoding { value: String },
}

/// Failures that abort an entire invocation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no epoch folders found in {path}")]
    NoEpochs { path: PathBuf },
    #[error("no participant folders found in {path}")]
    NoParticipants { path: PathBuf },
    #[error(transparent)]
    Config(#[from] ConfigError),
    // Single-file runs have exactly one unit, so its failure ends the run.
    #[error(transparent)]
    Unit(#[from] UnitError),
}
