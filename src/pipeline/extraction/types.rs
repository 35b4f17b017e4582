use serde::Serialize;

use super::ExtractionError;
use crate::pipeline::types::{ModalityTag, Payload, Task};

/// A decoded table: one header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Case-insensitive header lookup against a list of accepted names.
    pub fn column_index(&self, aliases: &[&str]) -> Option<usize> {
        self.headers.iter().position(|header| {
            let header = header.trim().to_lowercase();
            aliases.iter().any(|alias| header == *alias)
        })
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// How tabular bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    /// Delimited text; `None` sniffs the delimiter from the header line.
    Delimited(Option<u8>),
    /// Excel workbook (xlsx or xls); the first worksheet is read.
    Spreadsheet,
}

/// Structural description of a raster image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub mode: String,
    pub format: String,
}

/// Input kind for text recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Pdf,
    Image,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Capabilities (black boxes consumed by the handlers)
// ═══════════════════════════════════════════════════════════

/// Tabular decoding abstraction (CSV/TSV/XLSX).
pub trait TabularDecoder: Send + Sync {
    fn decode_tabular(&self, bytes: &[u8], format: TabularFormat) -> Result<Table, ExtractionError>;
}

/// Image metadata decoding abstraction.
pub trait ImageDecoder: Send + Sync {
    fn decode_image_meta(&self, bytes: &[u8]) -> Result<ImageMeta, ExtractionError>;
}

/// R-peak detection over a sampled waveform.
pub trait PeakDetector: Send + Sync {
    fn detect_peaks(
        &self,
        waveform: &[f64],
        sampling_rate_hz: f64,
    ) -> Result<Vec<usize>, ExtractionError>;
}

/// Text recognition (PDF text layer, OCR for images).
pub trait TextRecognizer: Send + Sync {
    fn extract_text(&self, bytes: &[u8], source: TextSource) -> Result<String, ExtractionError>;
}

/// Free-form findings for a medical image.
pub trait VisionAnalyzer: Send + Sync {
    fn analyze_image(&self, bytes: &[u8], media_type: &str) -> Result<String, ExtractionError>;
}

// ═══════════════════════════════════════════════════════════
// Modality handlers
// ═══════════════════════════════════════════════════════════

/// What a handler produced before the normalizer wraps it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub summary: String,
    pub payload: Payload,
    pub warnings: Vec<String>,
}

impl Extraction {
    pub fn new(summary: impl Into<String>, payload: Payload) -> Self {
        Self {
            summary: summary.into(),
            payload,
            warnings: Vec::new(),
        }
    }
}

/// One modality's normalization step. Each handler calls exactly one
/// capability family and returns a structured payload or an error.
pub trait ModalityHandler: Send + Sync {
    fn modality(&self) -> ModalityTag;

    fn extract(&self, task: &Task) -> Result<Extraction, ExtractionError>;
}

/// Truncate to at most `max_chars` characters, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_is_case_insensitive() {
        let table = Table {
            headers: vec!["Parameter".into(), " VALUE ".into(), "Норма".into()],
            rows: vec![],
        };
        assert_eq!(table.column_index(&["parameter"]), Some(0));
        assert_eq!(table.column_index(&["value"]), Some(1));
        assert_eq!(table.column_index(&["referencerange", "норма"]), Some(2));
        assert_eq!(table.column_index(&["unit"]), None);
    }

    #[test]
    fn cell_out_of_bounds_is_empty() {
        let table = Table {
            headers: vec!["a".into()],
            rows: vec![vec!["1".into()]],
        };
        assert_eq!(table.cell(0, 0), "1");
        assert_eq!(table.cell(0, 5), "");
        assert_eq!(table.cell(9, 0), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("глюкоза", 3), "глю");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
