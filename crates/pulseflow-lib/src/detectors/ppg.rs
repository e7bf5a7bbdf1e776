//! PPG systolic peak detection.
//!
//! The pipeline only depends on the [`PeakDetector`] trait: a filtered 1-D
//! signal and an integer sampling rate go in, per-sample peak flags and a
//! per-sample quality score come out. [`ElgendiDetector`] is the built-in
//! implementation (two-moving-average event detection over the squared
//! signal), with quality scored by correlating each beat against the mean
//! beat template and interpolating between beats.

/// Per-sample detector output. Both vectors have the input's length.
#[derive(Debug, Clone)]
pub struct PeakDetection {
    pub peaks: Vec<bool>,
    pub quality: Vec<f64>,
}

impl PeakDetection {
    fn empty(n: usize) -> Self {
        Self {
            peaks: vec![false; n],
            quality: vec![0.0; n],
        }
    }

    pub fn peak_indices(&self) -> Vec<usize> {
        self.peaks
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect()
    }
}

pub trait PeakDetector {
    fn detect(&self, signal: &[f64], sampling_rate: u32) -> PeakDetection;
}

/// Configurable parameters for the two-moving-average peak detector.
#[derive(Debug, Clone, Copy)]
pub struct ElgendiDetector {
    /// Systolic-peak moving average window (seconds).
    pub peak_window_s: f64,
    /// Beat-duration moving average window (seconds).
    pub beat_window_s: f64,
    /// Threshold offset as a fraction of the squared signal's mean power.
    pub offset_scale: f64,
    /// Half-width of the beat segment used for quality templates (seconds).
    pub template_half_s: f64,
}

impl Default for ElgendiDetector {
    fn default() -> Self {
        Self {
            peak_window_s: 0.111,
            beat_window_s: 0.667,
            offset_scale: 0.02,
            template_half_s: 0.375,
        }
    }
}

impl PeakDetector for ElgendiDetector {
    fn detect(&self, signal: &[f64], sampling_rate: u32) -> PeakDetection {
        let n = signal.len();
        if n == 0 || sampling_rate == 0 {
            return PeakDetection::empty(n);
        }
        let fs = sampling_rate as f64;

        // Clip negative excursions and square to emphasise systolic upstrokes.
        let squared: Vec<f64> = signal.iter().map(|&x| if x > 0.0 { x * x } else { 0.0 }).collect();

        let w_peak = ((self.peak_window_s * fs).round() as usize).max(1);
        let w_beat = ((self.beat_window_s * fs).round() as usize).max(w_peak);
        let ma_peak = centered_moving_average(&squared, w_peak);
        let ma_beat = centered_moving_average(&squared, w_beat);

        let alpha = self.offset_scale * mean(&squared);

        let mut peaks = vec![false; n];
        let mut i = 0;
        while i < n {
            if ma_peak[i] <= ma_beat[i] + alpha {
                i += 1;
                continue;
            }
            // Block of interest: contiguous run above threshold.
            let start = i;
            while i < n && ma_peak[i] > ma_beat[i] + alpha {
                i += 1;
            }
            // Runs shorter than the systolic window are noise.
            if i - start < w_peak {
                continue;
            }
            let mut idx = start;
            let mut max_val = f64::MIN;
            for j in start..i {
                if signal[j] > max_val {
                    max_val = signal[j];
                    idx = j;
                }
            }
            peaks[idx] = true;
        }

        let quality = self.template_quality(signal, &peaks, fs);
        PeakDetection { peaks, quality }
    }
}

impl ElgendiDetector {
    /// Score each beat by its correlation with the mean beat shape, then
    /// interpolate the per-beat scores across all samples.
    fn template_quality(&self, signal: &[f64], peaks: &[bool], fs: f64) -> Vec<f64> {
        let n = signal.len();
        let peak_idx: Vec<usize> = peaks
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect();
        if peak_idx.is_empty() {
            return vec![0.0; n];
        }

        let half = ((self.template_half_s * fs).round() as usize).max(1);
        let full: Vec<&usize> = peak_idx
            .iter()
            .filter(|&&p| p >= half && p + half < n)
            .collect();

        let mut beat_quality = vec![1.0; peak_idx.len()];
        if full.len() >= 2 {
            let width = 2 * half + 1;
            let mut template = vec![0.0; width];
            for &&p in &full {
                for (t, value) in template.iter_mut().zip(&signal[p - half..p + half + 1]) {
                    *t += value;
                }
            }
            for t in template.iter_mut() {
                *t /= full.len() as f64;
            }
            for (q, &p) in beat_quality.iter_mut().zip(&peak_idx) {
                let lo = p.saturating_sub(half);
                let hi = (p + half + 1).min(n);
                let t_lo = half - (p - lo);
                let t_hi = t_lo + (hi - lo);
                *q = pearson(&signal[lo..hi], &template[t_lo..t_hi]).clamp(0.0, 1.0);
            }
        }

        interpolate_between(&peak_idx, &beat_quality, n)
    }
}

fn centered_moving_average(data: &[f64], win: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 || win <= 1 {
        return data.to_vec();
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &x in data {
        acc += x;
        prefix.push(acc);
    }
    let lo_span = win / 2;
    let hi_span = win - 1 - lo_span;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(lo_span);
            let hi = (i + hi_span + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.len() < 2 {
        return 0.0;
    }
    let ma = mean(a);
    let mb = mean(b);
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Linear interpolation of sparse (index, value) points over a dense axis,
/// extending the edge values outward.
fn interpolate_between(indices: &[usize], values: &[f64], n: usize) -> Vec<f64> {
    debug_assert_eq!(indices.len(), values.len());
    let mut out = vec![0.0; n];
    if indices.is_empty() {
        return out;
    }
    let mut seg = 0;
    for i in 0..n {
        if i <= indices[0] {
            out[i] = values[0];
        } else if i >= indices[indices.len() - 1] {
            out[i] = values[values.len() - 1];
        } else {
            while indices[seg + 1] < i {
                seg += 1;
            }
            let (x0, x1) = (indices[seg], indices[seg + 1]);
            let frac = (i - x0) as f64 / (x1 - x0) as f64;
            out[i] = values[seg] + frac * (values[seg + 1] - values[seg]);
        }
    }
    out
}
