use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::document::DocumentHandler;
use super::ecg::EcgHandler;
use super::imaging::ImageHandler;
use super::lab::LabHandler;
use super::pdf::DocumentTextRecognizer;
use super::peaks::PanTompkinsDetector;
use super::raster::RasterDecoder;
use super::tabular::TableDecoder;
use super::types::{
    ImageDecoder, ModalityHandler, PeakDetector, TabularDecoder, TextRecognizer, VisionAnalyzer,
};
use super::ExtractionError;
use crate::config::PipelineSettings;
use crate::pipeline::types::{ErrorKind, ExtractionResult, ModalityTag, Task};

/// The capability set handed to the modality handlers.
#[derive(Clone)]
pub struct Capabilities {
    pub tabular: Arc<dyn TabularDecoder>,
    pub image: Arc<dyn ImageDecoder>,
    pub peaks: Arc<dyn PeakDetector>,
    pub text: Arc<dyn TextRecognizer>,
    pub vision: Option<Arc<dyn VisionAnalyzer>>,
}

impl Capabilities {
    /// Everything that runs in-process: CSV/XLSX, image metadata, peak
    /// detection, PDF text layer. No vision, no image OCR.
    pub fn local() -> Self {
        Self {
            tabular: Arc::new(TableDecoder),
            image: Arc::new(RasterDecoder),
            peaks: Arc::new(PanTompkinsDetector),
            text: Arc::new(DocumentTextRecognizer::pdf_only()),
            vision: None,
        }
    }
}

/// Turns any artifact into one `ExtractionResult`.
///
/// Dispatches on the modality tag to exactly one handler. Handler errors and
/// handler panics both come back as `ExtractionFailed`; nothing escapes.
pub struct ArtifactNormalizer {
    handlers: Vec<Box<dyn ModalityHandler>>,
    max_artifact_bytes: usize,
}

impl ArtifactNormalizer {
    pub fn new(capabilities: Capabilities, settings: &PipelineSettings) -> Self {
        let handlers: Vec<Box<dyn ModalityHandler>> = vec![
            Box::new(EcgHandler::new(
                capabilities.tabular.clone(),
                capabilities.peaks.clone(),
                settings.default_sampling_rate_hz,
            )),
            Box::new(LabHandler::new(capabilities.tabular.clone())),
            Box::new(ImageHandler::new(capabilities.image.clone(), capabilities.vision.clone())),
            Box::new(DocumentHandler::new(
                capabilities.text.clone(),
                settings.max_document_chars,
            )),
        ];
        Self {
            handlers,
            max_artifact_bytes: settings.max_artifact_bytes,
        }
    }

    pub fn normalize(&self, tag: ModalityTag, task: &Task) -> ExtractionResult {
        let Some(handler) = self.handlers.iter().find(|h| h.modality() == tag) else {
            return ExtractionResult::unrecognized();
        };

        let span = tracing::info_span!("normalize", modality = %tag, bytes = task.artifact.len());
        let _guard = span.enter();
        let start = Instant::now();

        let outcome = if task.artifact.len() > self.max_artifact_bytes {
            Err(ExtractionError::TooLarge {
                size: task.artifact.len(),
                limit: self.max_artifact_bytes,
            })
        } else {
            catch_unwind(AssertUnwindSafe(|| handler.extract(task)))
                .unwrap_or_else(|panic| Err(ExtractionError::Panicked(panic_message(&*panic))))
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(extraction) => {
                tracing::info!(elapsed_ms, warnings = extraction.warnings.len(), "Extraction complete");
                ExtractionResult::extracted(tag, extraction.summary, extraction.payload)
                    .with_warnings(extraction.warnings)
            }
            Err(e) => {
                tracing::warn!(elapsed_ms, error = %e, "Extraction failed");
                ExtractionResult::failed(
                    tag,
                    ErrorKind::ExtractionFailed {
                        modality: tag,
                        cause: e.to_string(),
                    },
                )
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
