pub mod types;
pub mod tabular;
pub mod raster;
pub mod peaks;
pub mod pdf;
pub mod ecg;
pub mod lab;
pub mod imaging;
pub mod document;
pub mod normalizer;

pub use types::*;
pub use normalizer::*;

use thiserror::Error;

/// Failures raised by extraction capabilities and modality handlers.
///
/// Never crosses the normalizer boundary: `ArtifactNormalizer` folds every
/// variant into `ErrorKind::ExtractionFailed`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("CSV decoding failed: {0}")]
    Csv(String),

    #[error("Spreadsheet decoding failed: {0}")]
    Spreadsheet(String),

    #[error("Table has no data rows")]
    EmptyTable,

    #[error("Missing expected columns: {0}")]
    MissingColumns(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("no OCR engine configured for {0} input")]
    OcrUnavailable(&'static str),

    #[error("Vision analysis failed: {0}")]
    Vision(String),

    #[error("Peak detection failed: {0}")]
    PeakDetection(String),

    #[error("artifact exceeds {limit} bytes ({size} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Extraction capability panicked: {0}")]
    Panicked(String),
}
