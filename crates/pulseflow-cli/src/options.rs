//! TOML run-configuration files: an alternative to spelling every pipeline
//! flag on the command line.

use anyhow::{Context, Result};
use pulseflow_lib::config::{Channel, ProcessingConfig};
use pulseflow_lib::io::raw::RawEncoding;
use pulseflow_lib::timefilter::ClockRange;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    #[serde(default)]
    window_minutes: Option<u32>,
    #[serde(default)]
    channels: Option<Vec<String>>,
    #[serde(default)]
    calculate_hrv: Option<bool>,
    #[serde(default)]
    ppi_low_ms: Option<u32>,
    #[serde(default)]
    ppi_high_ms: Option<u32>,
    #[serde(default)]
    time_range: Option<TimeRangeOptions>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeRangeOptions {
    start: String,
    end: String,
}

/// Load a processing configuration from a TOML file; unset keys keep their
/// defaults.
pub fn load_options(path: &Path) -> Result<ProcessingConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read options {}", path.display()))?;
    let file: OptionsFile = toml::from_str(&contents)
        .with_context(|| format!("parsing options {}", path.display()))?;

    let mut config = ProcessingConfig::default();
    if let Some(window) = file.window_minutes {
        config.window_minutes = window;
    }
    if let Some(channels) = file.channels {
        config.channels = channels
            .iter()
            .map(|c| c.parse::<Channel>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    if let Some(calculate_hrv) = file.calculate_hrv {
        config.calculate_hrv = calculate_hrv;
    }
    if let Some(low) = file.ppi_low_ms {
        config.ppi_low_ms = low;
    }
    if let Some(high) = file.ppi_high_ms {
        config.ppi_high_ms = high;
    }
    if let Some(range) = file.time_range {
        config.time_range = Some(ClockRange::parse(&range.start, &range.end)?);
    }
    if let Some(encoding) = file.encoding {
        config.encoding = Some(encoding.parse::<RawEncoding>()?);
    }
    config.validate()?;
    Ok(config)
}
