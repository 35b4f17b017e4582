//! Lab panel normalization: map columns onto {Parameter, Value, Unit,
//! ReferenceRange}, then flag values outside their reference range.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use super::types::{Extraction, ModalityHandler, Table, TabularDecoder, TabularFormat};
use super::ExtractionError;
use crate::pipeline::intent::resolve_extension;
use crate::pipeline::types::{ModalityTag, Payload, Task};

const PARAMETER_ALIASES: &[&str] = &["parameter", "параметр", "показатель", "test", "name", "analyte"];
const VALUE_ALIASES: &[&str] = &["value", "значение", "результат", "result"];
const UNIT_ALIASES: &[&str] = &["unit", "units", "единица", "единицы", "ед.", "ед. изм."];
const RANGE_ALIASES: &[&str] = &[
    "referencerange",
    "reference range",
    "reference_range",
    "range",
    "норма",
    "референс",
    "референсные значения",
];

const PREVIEW_ROWS: usize = 10;
pub const NO_DEVIATIONS: &str = "Отклонений от нормы не выявлено";

/// "<low>-<high>" with `-`, `–` or `—`, decimal point or comma.
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?\d+(?:[.,]\d+)?)\s*[-–—]\s*([+-]?\d+(?:[.,]\d+)?)\s*$").unwrap()
});

/// One lab measurement as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabRow {
    pub parameter: String,
    pub value: String,
    pub unit: String,
    pub reference_range: String,
}

/// Outcome of checking rows against their reference ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabEvaluation {
    pub flags: Vec<String>,
    /// Rows whose value or range could not be read as numbers.
    pub unparsed: usize,
}

impl LabEvaluation {
    pub fn summary(&self) -> String {
        if self.flags.is_empty() {
            NO_DEVIATIONS.to_string()
        } else {
            self.flags.join("; ")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabPayload {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub missing_values: BTreeMap<String, usize>,
    pub preview: Vec<Vec<String>>,
    pub flags: Vec<String>,
    pub unparsed: usize,
}

// ═══════════════════════════════════════════════════════════
// Range evaluation
// ═══════════════════════════════════════════════════════════

/// Parse a number written with either a decimal point or a decimal comma.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Parse "<low>-<high>". Inverted ranges are rejected.
pub fn parse_range(raw: &str) -> Option<(f64, f64)> {
    let caps = RANGE_RE.captures(raw)?;
    let low = parse_decimal(caps.get(1)?.as_str())?;
    let high = parse_decimal(caps.get(2)?.as_str())?;
    (low <= high).then_some((low, high))
}

/// Flag every row whose value falls outside `[low, high]`.
pub fn evaluate_rows(rows: &[LabRow]) -> LabEvaluation {
    let mut evaluation = LabEvaluation::default();
    for row in rows {
        match (parse_decimal(&row.value), parse_range(&row.reference_range)) {
            (Some(value), Some((low, high))) => {
                if value < low || value > high {
                    evaluation.flags.push(format!(
                        "{}: {} вне нормы ({})",
                        row.parameter.trim(),
                        row.value.trim(),
                        row.reference_range.trim()
                    ));
                }
            }
            _ => evaluation.unparsed += 1,
        }
    }
    evaluation
}

/// Lab rows from recognized text: comma-separated lines with at least three
/// fields, read as parameter, value, unit, range. A leading header line is
/// skipped.
pub fn rows_from_text(text: &str) -> Vec<LabRow> {
    let mut rows: Vec<LabRow> = text
        .lines()
        .map(|line| line.split(',').map(str::trim).collect::<Vec<_>>())
        .filter(|fields| fields.len() >= 3)
        .map(|fields| LabRow {
            parameter: fields[0].to_string(),
            value: fields[1].to_string(),
            unit: fields[2].to_string(),
            reference_range: fields.get(3).map(|s| s.to_string()).unwrap_or_default(),
        })
        .collect();
    if rows.first().is_some_and(|r| parse_decimal(&r.value).is_none()) {
        rows.remove(0);
    }
    rows
}

// ═══════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════

pub struct LabHandler {
    decoder: Arc<dyn TabularDecoder>,
}

impl LabHandler {
    pub fn new(decoder: Arc<dyn TabularDecoder>) -> Self {
        Self { decoder }
    }
}

impl ModalityHandler for LabHandler {
    fn modality(&self) -> ModalityTag {
        ModalityTag::Lab
    }

    fn extract(&self, task: &Task) -> Result<Extraction, ExtractionError> {
        let artifact = &task.artifact;
        let format = match resolve_extension(&artifact.file_name, Some(&artifact.bytes)).as_deref() {
            Some("xlsx") | Some("xls") => TabularFormat::Spreadsheet,
            _ => TabularFormat::Delimited(None),
        };
        let table = self.decoder.decode_tabular(&artifact.bytes, format)?;
        if table.rows.is_empty() {
            return Err(ExtractionError::EmptyTable);
        }

        let rows = lab_rows(&table)?;
        let evaluation = evaluate_rows(&rows);

        tracing::debug!(
            rows = rows.len(),
            flagged = evaluation.flags.len(),
            unparsed = evaluation.unparsed,
            "Lab panel evaluated"
        );

        let payload = LabPayload {
            row_count: table.rows.len(),
            column_count: table.headers.len(),
            columns: table.headers.clone(),
            missing_values: missing_values(&table),
            preview: table.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            flags: evaluation.flags.clone(),
            unparsed: evaluation.unparsed,
        };
        Ok(Extraction::new(evaluation.summary(), Payload::Lab(payload)))
    }
}

fn lab_rows(table: &Table) -> Result<Vec<LabRow>, ExtractionError> {
    let parameter = table.column_index(PARAMETER_ALIASES);
    let value = table.column_index(VALUE_ALIASES);
    let range = table.column_index(RANGE_ALIASES);
    let unit = table.column_index(UNIT_ALIASES);

    let (parameter, value, range) = match (parameter, value, range) {
        (Some(p), Some(v), Some(r)) => (p, v, r),
        _ => {
            let missing = [
                (parameter, "Parameter"),
                (value, "Value"),
                (range, "ReferenceRange"),
            ]
            .iter()
            .filter(|(idx, _)| idx.is_none())
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
            return Err(ExtractionError::MissingColumns(missing.join(", ")));
        }
    };

    Ok((0..table.rows.len())
        .map(|row| LabRow {
            parameter: table.cell(row, parameter).to_string(),
            value: table.cell(row, value).to_string(),
            unit: unit.map(|u| table.cell(row, u).to_string()).unwrap_or_default(),
            reference_range: table.cell(row, range).to_string(),
        })
        .collect())
}

fn missing_values(table: &Table) -> BTreeMap<String, usize> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let missing = (0..table.rows.len())
                .filter(|row| table.cell(*row, col).trim().is_empty())
                .count();
            (header.clone(), missing)
        })
        .collect()
}
