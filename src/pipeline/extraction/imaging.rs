use std::sync::Arc;

use serde::Serialize;

use super::types::{Extraction, ImageDecoder, ModalityHandler, VisionAnalyzer};
use super::ExtractionError;
use crate::pipeline::intent::resolve_extension;
use crate::pipeline::types::{ModalityTag, Payload, Task};

const FALLBACK_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Serialize)]
pub struct ImagePayload {
    /// Structural metadata; absent when the bytes could not be decoded
    /// locally but the vision capability still produced findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub media_type: String,
    /// Free-text findings from the vision capability, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
}

/// Medical image handler: structural metadata always, vision findings when
/// an analyzer is configured.
pub struct ImageHandler {
    decoder: Arc<dyn ImageDecoder>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
}

impl ImageHandler {
    pub fn new(decoder: Arc<dyn ImageDecoder>, vision: Option<Arc<dyn VisionAnalyzer>>) -> Self {
        Self { decoder, vision }
    }
}

impl ModalityHandler for ImageHandler {
    fn modality(&self) -> ModalityTag {
        ModalityTag::Image
    }

    fn extract(&self, task: &Task) -> Result<Extraction, ExtractionError> {
        let artifact = &task.artifact;
        let media_type = media_type_for(&artifact.file_name, &artifact.bytes);
        let mut warnings = Vec::new();

        // Without a vision capability an undecodable image is a failure; with
        // one, the bytes still go to vision and the decode error is a warning.
        let meta = match (self.decoder.decode_image_meta(&artifact.bytes), &self.vision) {
            (Ok(meta), _) => Some(meta),
            (Err(e), None) => return Err(e),
            (Err(e), Some(_)) => {
                tracing::warn!(error = %e, "Image metadata unavailable, relying on vision analysis");
                warnings.push(e.to_string());
                None
            }
        };

        let findings = match &self.vision {
            Some(vision) => match vision.analyze_image(&artifact.bytes, &media_type) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => {
                    warnings.push("vision analysis returned no findings".to_string());
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Vision analysis failed, keeping image metadata");
                    warnings.push(e.to_string());
                    None
                }
            },
            None => None,
        };

        let summary = match (&findings, &meta) {
            (Some(text), _) => text.clone(),
            (None, Some(meta)) => format!(
                "Изображение {}x{}, режим {}, формат {}",
                meta.width, meta.height, meta.mode, meta.format
            ),
            // Neither local decoding nor vision produced anything.
            (None, None) => {
                return Err(ExtractionError::ImageProcessing(warnings.join("; ")));
            }
        };

        let payload = match meta {
            Some(meta) => ImagePayload {
                width: Some(meta.width),
                height: Some(meta.height),
                mode: Some(meta.mode),
                format: Some(meta.format),
                media_type,
                findings,
            },
            None => ImagePayload {
                width: None,
                height: None,
                mode: None,
                format: None,
                media_type,
                findings,
            },
        };
        let mut extraction = Extraction::new(summary, Payload::Image(payload));
        extraction.warnings = warnings;
        Ok(extraction)
    }
}

/// MIME type from the file name, falling back to sniffed content, then JPEG.
pub fn media_type_for(file_name: &str, bytes: &[u8]) -> String {
    resolve_extension(file_name, Some(bytes))
        .and_then(|ext| mime_guess::from_ext(&ext).first_raw())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or(FALLBACK_MEDIA_TYPE)
        .to_string()
}

// ──────────────────────────────────────────────
// MockVisionAnalyzer (testing)
// ──────────────────────────────────────────────

pub struct MockVisionAnalyzer {
    findings: Option<String>,
}

impl MockVisionAnalyzer {
    pub fn new(findings: &str) -> Self {
        Self {
            findings: Some(findings.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { findings: None }
    }
}

impl VisionAnalyzer for MockVisionAnalyzer {
    fn analyze_image(&self, _bytes: &[u8], _media_type: &str) -> Result<String, ExtractionError> {
        self.findings
            .clone()
            .ok_or_else(|| ExtractionError::Vision("mock vision failure".into()))
    }
}
