//! Raw PPG ingestion and timestamp reconstruction.
//!
//! Raw files are headerless CSV with an ambiguous first column, three PPG
//! channels, an ambient-light column, and possibly extra columns. Two first
//! column encodings are supported: sparse absolute epoch-second anchors
//! between batched zero rows, and per-row deltas whose sum gives the elapsed
//! time with the recording start kept in a sidecar `info.txt`. Either way the
//! rows are placed at equal spacing over the recording span, i.e. a constant
//! sampling rate is assumed across batch boundaries.

use crate::config::Channel;
use crate::error::{ConfigError, UnitError};
use crate::signal::Recording;
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// First-column encoding. The heuristics below are format-fragile, so callers
/// that know the encoding should pass it explicitly instead of relying on
/// auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawEncoding {
    /// Sparse epoch-second anchors, zero elsewhere.
    Absolute,
    /// Small per-row deltas (ms); requires `start_time` from the sidecar.
    Delta,
}

impl FromStr for RawEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absolute" => Ok(RawEncoding::Absolute),
            "delta" => Ok(RawEncoding::Delta),
            _ => Err(ConfigError::UnknownEncoding { value: s.into() }),
        }
    }
}

/// Anchor values above this are taken to be epoch seconds.
const EPOCH_SECONDS_FLOOR: f64 = 1e9;
/// First columns whose maximum stays at or below this are delta-encoded.
const DELTA_MAX: f64 = 10_000.0;

/// Sidecar file name expected next to delta-encoded recordings.
pub const SIDECAR_NAME: &str = "info.txt";
/// Fixed raw file name inside epoch folders.
pub const RAW_FILE_NAME: &str = "ppg.csv";

/// Read one raw PPG file and reconstruct absolute timestamps.
///
/// `sidecar_dir` overrides where `info.txt` is looked up (defaults to the
/// file's parent directory). `encoding` skips heuristic detection entirely.
pub fn read_ppg_csv(
    path: &Path,
    sidecar_dir: Option<&Path>,
    encoding: Option<RawEncoding>,
) -> Result<Recording, UnitError> {
    let table = read_raw_table(path)?;
    if table.first.is_empty() {
        return Err(UnitError::EmptyRecording);
    }

    let encoding = match encoding {
        Some(tag) => tag,
        None => detect_encoding(&table.first).ok_or_else(|| UnitError::UnrecognizedEncoding {
            path: path.to_path_buf(),
        })?,
    };

    let times_ms = match encoding {
        RawEncoding::Absolute => absolute_expansion(&table.first).ok_or_else(|| {
            UnitError::UnrecognizedEncoding {
                path: path.to_path_buf(),
            }
        })?,
        RawEncoding::Delta => {
            let dir = sidecar_dir
                .map(Path::to_path_buf)
                .or_else(|| path.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            let start_time =
                read_sidecar_start_time(&dir)?.ok_or_else(|| UnitError::MissingStartTime {
                    path: path.to_path_buf(),
                })?;
            delta_expansion(&table.first, start_time)
        }
    };

    Ok(Recording {
        times: times_ms.into_iter().map(datetime_from_ms).collect(),
        channels: table.channels,
        ambient: table.ambient,
    })
}

struct RawTable {
    first: Vec<f64>,
    channels: BTreeMap<Channel, Vec<f64>>,
    ambient: Option<Vec<f64>>,
}

fn read_raw_table(path: &Path) -> Result<RawTable, UnitError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|source| {
            if matches!(source.kind(), csv::ErrorKind::Io(_)) {
                UnitError::Read {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
                }
            } else {
                UnitError::Csv {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

    let mut first = Vec::new();
    let mut p0 = Vec::new();
    let mut p1 = Vec::new();
    let mut p2 = Vec::new();
    let mut ambient = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|source| UnitError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        if record.len() < 5 {
            return Err(UnitError::ColumnCount {
                path: path.to_path_buf(),
                columns: record.len(),
            });
        }
        let field = |idx: usize| -> Result<f64, UnitError> {
            let text = record.get(idx).unwrap_or("").trim();
            text.parse::<f64>().map_err(|_| UnitError::BadNumber {
                path: path.to_path_buf(),
                row: row + 1,
                value: text.to_string(),
            })
        };
        first.push(field(0)?);
        p0.push(field(1)?);
        p1.push(field(2)?);
        p2.push(field(3)?);
        ambient.push(field(4)?);
    }

    let channels = BTreeMap::from([(Channel::P0, p0), (Channel::P1, p1), (Channel::P2, p2)]);
    Ok(RawTable {
        first,
        channels,
        ambient: Some(ambient),
    })
}

fn detect_encoding(first: &[f64]) -> Option<RawEncoding> {
    let max = first.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > EPOCH_SECONDS_FLOOR {
        Some(RawEncoding::Absolute)
    } else if max <= DELTA_MAX {
        Some(RawEncoding::Delta)
    } else {
        None
    }
}

/// Place every row at equal spacing between the first and last epoch-second
/// anchor. Returns milliseconds since the epoch, or None when the column has
/// no plausible anchors.
fn absolute_expansion(first: &[f64]) -> Option<Vec<f64>> {
    let mut anchors = first.iter().copied().filter(|v| *v != 0.0);
    let start = anchors.next()?;
    if start <= EPOCH_SECONDS_FLOOR {
        return None;
    }
    let end = anchors.last().unwrap_or(start);
    Some(linspace(start * 1000.0, end * 1000.0, first.len()))
}

/// Deltas are not applied per row; only their sum matters. Rows are spread
/// evenly over the summed span starting at the sidecar start time.
fn delta_expansion(first: &[f64], start_time: i64) -> Vec<f64> {
    let total_ms: f64 = first.iter().sum();
    let base = start_time as f64 * 1000.0;
    linspace(0.0, total_ms, first.len())
        .into_iter()
        .map(|offset| base + offset)
        .collect()
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn datetime_from_ms(ms: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos((ms * 1e6).round() as i64)
}

/// Read `start_time: <integer>` from the folder's `info.txt`, if present.
pub fn read_sidecar_start_time(dir: &Path) -> Result<Option<i64>, UnitError> {
    let path = dir.join(SIDECAR_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|source| UnitError::Read {
        path: path.clone(),
        source,
    })?;
    Ok(parse_start_time(&text))
}

fn parse_start_time(text: &str) -> Option<i64> {
    for line in text.lines() {
        let Some(rest) = line.trim_start().strip_prefix("start_time") else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(value) = digits.parse() {
            return Some(value);
        }
    }
    None
}
