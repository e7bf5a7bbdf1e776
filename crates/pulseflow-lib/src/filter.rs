//! Signal conditioning: ambient subtraction and zero-phase bandpass.

use crate::error::UnitError;
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, SosFormatFilter,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;

/// Physiological heart-rate passband.
pub const PPG_LOW_HZ: f64 = 0.5;
pub const PPG_HIGH_HZ: f64 = 4.0;
/// Butterworth order used throughout the pipeline.
pub const PPG_FILTER_ORDER: usize = 11;

/// Forward-backward Butterworth bandpass (second-order sections).
pub fn bandpass_filter(
    signal: &[f64],
    lowcut: f64,
    highcut: f64,
    fs: f64,
    order: usize,
) -> Result<Vec<f64>, UnitError> {
    if signal.is_empty() {
        return Ok(Vec::new());
    }
    // Forward-backward filtering pads the signal edges; an order-N bandpass
    // yields N second-order sections and needs 3*(2N+1) samples of headroom.
    let min_len = 3 * (2 * order + 1) + 1;
    if signal.len() < min_len {
        return Err(UnitError::RecordingTooShort {
            samples: signal.len(),
        });
    }
    if highcut >= fs * 0.5 {
        return Err(UnitError::FilterDesign { fs });
    }
    let filter = butter_dyn(
        order,
        vec![lowcut, highcut],
        Some(FilterBandType::Bandpass),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
        return Err(UnitError::FilterDesign { fs });
    };
    Ok(sosfiltfilt_dyn(signal.iter(), &sos))
}

/// Condition one PPG channel: subtract the ambient-light column when present,
/// then bandpass to the heart-rate band.
pub fn condition_channel(
    raw: &[f64],
    ambient: Option<&[f64]>,
    fs: f64,
) -> Result<Vec<f64>, UnitError> {
    let cleaned: Vec<f64> = match ambient {
        Some(ambient) => raw.iter().zip(ambient).map(|(s, a)| s - a).collect(),
        None => raw.to_vec(),
    };
    bandpass_filter(&cleaned, PPG_LOW_HZ, PPG_HIGH_HZ, fs, PPG_FILTER_ORDER)
}
