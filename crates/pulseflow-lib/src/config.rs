use crate::error::ConfigError;
use crate::io::raw::RawEncoding;
use crate::timefilter::ClockRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// PPG channel identifiers as they appear in the raw column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    P0,
    P1,
    P2,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::P0 => "P0",
            Channel::P1 => "P1",
            Channel::P2 => "P2",
        }
    }

    pub fn all() -> [Channel; 3] {
        [Channel::P0, Channel::P1, Channel::P2]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Channel::P0),
            "P1" => Ok(Channel::P1),
            "P2" => Ok(Channel::P2),
            _ => Err(ConfigError::UnknownChannel { value: s.into() }),
        }
    }
}

/// Everything a processing run accepts from the caller.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// HRV aggregation window in minutes.
    pub window_minutes: u32,
    /// Channels to process; missing channels are skipped with a status.
    pub channels: Vec<Channel>,
    /// Skip HRV windowing entirely when false (PPI tables still produced).
    pub calculate_hrv: bool,
    /// Inclusive PPI outlier band, milliseconds.
    pub ppi_low_ms: u32,
    pub ppi_high_ms: u32,
    /// Optional clock time-of-day restriction.
    pub time_range: Option<ClockRange>,
    /// Explicit raw-column encoding; None falls back to heuristic detection.
    pub encoding: Option<RawEncoding>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            channels: Channel::all().to_vec(),
            calculate_hrv: true,
            ppi_low_ms: 667,
            ppi_high_ms: 2000,
            time_range: None,
            encoding: None,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_minutes < 1 {
            return Err(ConfigError::WindowTooSmall);
        }
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.ppi_low_ms >= self.ppi_high_ms {
            return Err(ConfigError::EmptyPpiBand {
                low_ms: self.ppi_low_ms,
                high_ms: self.ppi_high_ms,
            });
        }
        if let Some(range) = &self.time_range {
            range.validate()?;
        }
        Ok(())
    }
}
