//! ECG normalization: decode a sampled trace, pick the signal column,
//! resolve the sampling rate and hand the waveform to a `PeakDetector`.

use std::sync::Arc;

use serde::Serialize;

use super::lab::parse_decimal;
use super::types::{Extraction, ModalityHandler, PeakDetector, Table, TabularDecoder, TabularFormat};
use super::ExtractionError;
use crate::pipeline::intent::resolve_extension;
use crate::pipeline::types::{ModalityTag, Payload, Task};

/// A header whose first word starts with one of these names the time axis
/// (`Time (s)`, `timestamp`, `время, с`).
const TIME_STEMS: &[&str] = &["time", "врем"];
/// A header whose first word is exactly one of these names the time axis
/// (`t_sec`, `sec`, `ms`).
const TIME_WORDS: &[&str] = &["t", "s", "sec", "secs", "second", "seconds", "ms", "msec", "с", "мс"];
/// Any of these words in a time header means the axis is in milliseconds.
const MILLISECOND_WORDS: &[&str] = &["ms", "msec", "millis", "milliseconds", "мс"];
/// Header names recognized as a plain row index.
const INDEX_COLUMNS: &[&str] = &["", "index", "idx", "#", "n", "sample", "№"];

const PREVIEW_ROWS: usize = 5;
const MAX_LISTED_PEAKS: usize = 50;
/// Explicit and inferred rates further apart than this raise a warning.
const RATE_MISMATCH_RATIO: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRateSource {
    Explicit,
    Inferred,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EcgPayload {
    /// Rows × columns.
    pub shape: [usize; 2],
    pub columns: Vec<String>,
    pub time_column: Option<String>,
    pub signal_column: String,
    pub sampling_rate_hz: f64,
    pub sampling_rate_source: SamplingRateSource,
    pub statistics: Vec<ColumnStats>,
    pub preview: Vec<Vec<String>>,
    pub r_peak_count: usize,
    /// First peaks only; `r_peak_count` is the full count.
    pub r_peaks: Vec<usize>,
    pub heart_rate_bpm: Option<f64>,
}

pub struct EcgHandler {
    decoder: Arc<dyn TabularDecoder>,
    detector: Arc<dyn PeakDetector>,
    default_sampling_rate_hz: f64,
}

impl EcgHandler {
    pub fn new(
        decoder: Arc<dyn TabularDecoder>,
        detector: Arc<dyn PeakDetector>,
        default_sampling_rate_hz: f64,
    ) -> Self {
        Self {
            decoder,
            detector,
            default_sampling_rate_hz,
        }
    }
}

impl ModalityHandler for EcgHandler {
    fn modality(&self) -> ModalityTag {
        ModalityTag::Ecg
    }

    fn extract(&self, task: &Task) -> Result<Extraction, ExtractionError> {
        let artifact = &task.artifact;
        // .txt traces are exported tab separated, everything else comma separated.
        let delimiter = match resolve_extension(&artifact.file_name, Some(&artifact.bytes)).as_deref() {
            Some("txt") => b'\t',
            _ => b',',
        };
        let table = self
            .decoder
            .decode_tabular(&artifact.bytes, TabularFormat::Delimited(Some(delimiter)))?;
        if table.rows.is_empty() {
            return Err(ExtractionError::EmptyTable);
        }

        let numeric = numeric_columns(&table);
        let time_col = find_time_column(&table);
        let index_col = match time_col {
            Some(_) => None,
            None => find_index_column(&table, &numeric),
        };
        let (signal_col, signal) = numeric
            .iter()
            .find(|(col, _)| Some(*col) != time_col && Some(*col) != index_col)
            .map(|(col, values)| (*col, values.clone()))
            .ok_or_else(|| ExtractionError::MissingColumns("signal column".into()))?;

        let mut warnings = Vec::new();
        let inferred = time_col.and_then(|col| {
            let times = numeric.iter().find(|(c, _)| *c == col)?.1.as_slice();
            infer_sampling_rate(times, is_milliseconds(&table.headers[col]))
        });
        let explicit = task.sampling_rate_hz.filter(|hz| hz.is_finite() && *hz > 0.0);
        let (sampling_rate_hz, sampling_rate_source) = match (explicit, inferred) {
            (Some(hz), Some(seen)) => {
                if ((hz - seen) / hz).abs() > RATE_MISMATCH_RATIO {
                    warnings.push(format!(
                        "declared sampling rate {hz} Hz differs from the time column ({seen:.1} Hz)"
                    ));
                }
                (hz, SamplingRateSource::Explicit)
            }
            (Some(hz), None) => (hz, SamplingRateSource::Explicit),
            (None, Some(seen)) => (seen, SamplingRateSource::Inferred),
            (None, None) => (self.default_sampling_rate_hz, SamplingRateSource::Default),
        };

        let peaks = self.detector.detect_peaks(&signal, sampling_rate_hz)?;
        let heart_rate_bpm = heart_rate(&peaks, sampling_rate_hz);

        tracing::debug!(
            rows = table.rows.len(),
            peaks = peaks.len(),
            sampling_rate_hz,
            source = ?sampling_rate_source,
            "ECG trace normalized"
        );

        let mut summary = format!("R-пики: {}", peaks.len());
        if let Some(bpm) = heart_rate_bpm {
            summary.push_str(&format!(", ЧСС ≈ {bpm:.0} уд/мин"));
        }

        let payload = EcgPayload {
            shape: [table.rows.len(), table.headers.len()],
            columns: table.headers.clone(),
            time_column: time_col.map(|c| table.headers[c].clone()),
            signal_column: table.headers[signal_col].clone(),
            sampling_rate_hz,
            sampling_rate_source,
            statistics: numeric
                .iter()
                .filter_map(|(col, values)| describe(&table.headers[*col], values))
                .collect(),
            preview: table.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            r_peak_count: peaks.len(),
            r_peaks: peaks.iter().take(MAX_LISTED_PEAKS).copied().collect(),
            heart_rate_bpm,
        };

        let mut extraction = Extraction::new(summary, Payload::Ecg(payload));
        extraction.warnings = warnings;
        Ok(extraction)
    }
}

// ──────────────────────────────────────────────
// Column selection
// ──────────────────────────────────────────────

fn header_words(header: &str) -> Vec<String> {
    header
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_time_header(header: &str) -> bool {
    let words = header_words(header);
    let Some(first) = words.first() else {
        return false;
    };
    TIME_STEMS.iter().any(|stem| first.starts_with(stem)) || TIME_WORDS.contains(&first.as_str())
}

fn find_time_column(table: &Table) -> Option<usize> {
    table.headers.iter().position(|h| is_time_header(h))
}

/// Only the leading column can be an index: either by name, or, when at
/// least two columns are numeric, because it strictly increases.
fn find_index_column(table: &Table, numeric: &[(usize, Vec<f64>)]) -> Option<usize> {
    let header = table.headers.first()?.trim().to_lowercase();
    if INDEX_COLUMNS.contains(&header.as_str()) {
        return Some(0);
    }
    if numeric.len() < 2 {
        return None;
    }
    let (col, values) = numeric.first()?;
    let ramp = *col == 0 && values.len() > 1 && values.windows(2).all(|w| w[1] > w[0]);
    ramp.then_some(0)
}

fn is_milliseconds(header: &str) -> bool {
    header_words(header)
        .iter()
        .any(|w| MILLISECOND_WORDS.contains(&w.as_str()))
}

/// Columns whose every cell parses as a number, in header order.
fn numeric_columns(table: &Table) -> Vec<(usize, Vec<f64>)> {
    (0..table.headers.len())
        .filter_map(|col| {
            let values = (0..table.rows.len())
                .map(|row| parse_decimal(table.cell(row, col)))
                .collect::<Option<Vec<f64>>>()?;
            values.iter().all(|v| v.is_finite()).then_some((col, values))
        })
        .collect()
}

// ──────────────────────────────────────────────
// Signal arithmetic
// ──────────────────────────────────────────────

/// Sampling rate from the median positive step of the time axis.
fn infer_sampling_rate(times: &[f64], milliseconds: bool) -> Option<f64> {
    let mut steps: Vec<f64> = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|step| *step > 0.0)
        .collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(f64::total_cmp);
    let median = steps[steps.len() / 2];
    let step_secs = if milliseconds { median / 1000.0 } else { median };
    let hz = 1.0 / step_secs;
    hz.is_finite().then_some(hz)
}

fn heart_rate(peaks: &[usize], sampling_rate_hz: f64) -> Option<f64> {
    let (first, last) = (*peaks.first()?, *peaks.last()?);
    if peaks.len() < 2 || last <= first {
        return None;
    }
    let mean_rr_secs = (last - first) as f64 / (peaks.len() - 1) as f64 / sampling_rate_hz;
    Some(60.0 / mean_rr_secs)
}

/// count / mean / sample std / min / max.
fn describe(column: &str, values: &[f64]) -> Option<ColumnStats> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    Some(ColumnStats {
        column: column.to_string(),
        count,
        mean,
        std,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}
