//! QRS detection in the Pan–Tompkins style: differentiate, square,
//! integrate over a moving window, threshold, then pick the raw maximum
//! inside each region and enforce a refractory period.

use super::types::PeakDetector;
use super::ExtractionError;

/// Moving-window integration width.
const INTEGRATION_WINDOW_SECS: f64 = 0.150;
/// Minimum spacing between two R peaks.
const REFRACTORY_SECS: f64 = 0.200;
/// Fraction of the integrated maximum a region must exceed.
const THRESHOLD_RATIO: f64 = 0.3;

pub struct PanTompkinsDetector;

impl PeakDetector for PanTompkinsDetector {
    fn detect_peaks(
        &self,
        waveform: &[f64],
        sampling_rate_hz: f64,
    ) -> Result<Vec<usize>, ExtractionError> {
        if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
            return Err(ExtractionError::PeakDetection(format!(
                "sampling rate must be positive, got {sampling_rate_hz}"
            )));
        }
        if waveform.iter().any(|v| !v.is_finite()) {
            return Err(ExtractionError::PeakDetection(
                "waveform contains non-finite samples".into(),
            ));
        }
        if waveform.len() < 3 {
            return Ok(Vec::new());
        }

        let window = ((INTEGRATION_WINDOW_SECS * sampling_rate_hz).round() as usize).max(1);
        let integrated = integrate(&square(&differentiate(waveform)), window);

        let max = integrated.iter().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Ok(Vec::new());
        }
        let threshold = THRESHOLD_RATIO * max;

        let candidates = regions_above(&integrated, threshold)
            .into_iter()
            .map(|(start, end)| {
                // Integration lags the QRS complex by up to one window.
                let from = start.saturating_sub(window);
                let to = (end + 1).min(waveform.len() - 1);
                argmax(waveform, from, to)
            })
            .collect::<Vec<_>>();

        let refractory = ((REFRACTORY_SECS * sampling_rate_hz).round() as usize).max(1);
        Ok(enforce_refractory(waveform, candidates, refractory))
    }
}

fn differentiate(signal: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(signal.len());
    out.push(0.0);
    out.extend(signal.windows(2).map(|w| w[1] - w[0]));
    out
}

fn square(signal: &[f64]) -> Vec<f64> {
    signal.iter().map(|v| v * v).collect()
}

/// Trailing moving-window mean.
fn integrate(signal: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(signal.len());
    let mut sum = 0.0;
    for (i, value) in signal.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= signal[i - window];
        }
        out.push(sum / window as f64);
    }
    out
}

/// Inclusive index ranges where `signal` stays above `threshold`.
fn regions_above(signal: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut start = None;
    for (i, value) in signal.iter().enumerate() {
        match (start, *value > threshold) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                regions.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        regions.push((s, signal.len() - 1));
    }
    regions
}

fn argmax(signal: &[f64], from: usize, to: usize) -> usize {
    (from..=to)
        .max_by(|a, b| signal[*a].total_cmp(&signal[*b]))
        .unwrap_or(from)
}

/// Of two peaks closer than `refractory` samples, keep the taller one.
fn enforce_refractory(signal: &[f64], candidates: Vec<usize>, refractory: usize) -> Vec<usize> {
    let mut peaks: Vec<usize> = Vec::with_capacity(candidates.len());
    for idx in candidates {
        match peaks.last_mut() {
            Some(last) if idx == *last => {}
            Some(last) if idx - *last < refractory => {
                if signal[idx] > signal[*last] {
                    *last = idx;
                }
            }
            _ => peaks.push(idx),
        }
    }
    peaks
}

// ──────────────────────────────────────────────
// MockPeakDetector (testing)
// ──────────────────────────────────────────────

pub struct MockPeakDetector {
    peaks: Option<Vec<usize>>,
}

impl MockPeakDetector {
    pub fn new(peaks: Vec<usize>) -> Self {
        Self { peaks: Some(peaks) }
    }

    pub fn failing() -> Self {
        Self { peaks: None }
    }
}

impl PeakDetector for MockPeakDetector {
    fn detect_peaks(&self, _waveform: &[f64], _sampling_rate_hz: f64) -> Result<Vec<usize>, ExtractionError> {
        self.peaks
            .clone()
            .ok_or_else(|| ExtractionError::PeakDetection("mock detector failure".into()))
    }
}
