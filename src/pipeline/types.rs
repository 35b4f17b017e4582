use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::extraction::document::DocumentPayload;
use super::extraction::ecg::EcgPayload;
use super::extraction::imaging::ImagePayload;
use super::extraction::lab::LabPayload;

// ═══════════════════════════════════════════════════════════
// Task & artifact
// ═══════════════════════════════════════════════════════════

/// Uploaded bytes together with the name they arrived under.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.file_name)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// SHA-256 of the artifact bytes, hex encoded.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

/// Lower-cased extension of a file name. Empty extensions count as none.
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

/// One user submission. Immutable once built; dropped when the pipeline returns.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub artifact: Artifact,
    /// Sampling rate declared by the caller for waveform artifacts.
    pub sampling_rate_hz: Option<f64>,
}

impl Task {
    pub fn new(description: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            artifact,
            sampling_rate_hz: None,
        }
    }

    pub fn with_sampling_rate(mut self, hz: f64) -> Self {
        self.sampling_rate_hz = Some(hz);
        self
    }

    /// A task with neither an artifact nor a description carries nothing to analyze.
    pub fn is_blank(&self) -> bool {
        self.artifact.is_empty() && self.description.trim().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════
// Modality
// ═══════════════════════════════════════════════════════════

/// Category of medical artifact. `Unknown` is a valid terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModalityTag {
    Ecg,
    Image,
    Lab,
    Document,
    Unknown,
}

impl ModalityTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecg => "ECG",
            Self::Image => "IMAGE",
            Self::Lab => "LAB",
            Self::Document => "DOCUMENT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ModalityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Error taxonomy
// ═══════════════════════════════════════════════════════════

/// Every failure the pipeline can report to its caller.
///
/// Extraction failures are recovered into `ExtractionResult`; report failures
/// are terminal for the task. Nothing here is retried inside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("Could not extract {modality} data: {cause}")]
    ExtractionFailed { modality: ModalityTag, cause: String },

    #[error("The artifact type could not be recognized from its name, content or task description")]
    UnrecognizedArtifact,

    #[error("No API key configured for the report service")]
    MissingCredential,

    #[error("The report service rejected the API key (HTTP 401)")]
    AuthFailure,

    #[error("The report service is rate limiting requests (HTTP 429), try again later")]
    RateLimited,

    #[error("The report service failed internally (HTTP 500), try again later")]
    UpstreamError,

    #[error("The report service returned HTTP {code}: {body}")]
    UnexpectedStatus { code: u16, body: String },

    #[error("The report service did not answer within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Network error while contacting the report service: {message}")]
    Transport { message: String },
}

impl ErrorKind {
    /// Whether a caller may retry after backing off.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamError)
    }
}

// ═══════════════════════════════════════════════════════════
// Extraction result
// ═══════════════════════════════════════════════════════════

/// Modality-specific structured data, bounded in size by its producer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Ecg(EcgPayload),
    Lab(LabPayload),
    Image(ImagePayload),
    Document(DocumentPayload),
}

/// Normalized output of one extraction, whatever the modality.
///
/// Exactly one of `payload` and `extraction_error` is present; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    modality: ModalityTag,
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extraction_error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn extracted(modality: ModalityTag, summary: impl Into<String>, payload: Payload) -> Self {
        Self {
            modality,
            summary: summary.into(),
            payload: Some(payload),
            extraction_error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(modality: ModalityTag, error: ErrorKind) -> Self {
        Self {
            modality,
            summary: error.to_string(),
            payload: None,
            extraction_error: Some(error),
            warnings: Vec::new(),
        }
    }

    /// Synthetic result for artifacts the classifier could not place.
    pub fn unrecognized() -> Self {
        Self::failed(ModalityTag::Unknown, ErrorKind::UnrecognizedArtifact)
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn modality(&self) -> ModalityTag {
        self.modality
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.extraction_error.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_success(&self) -> bool {
        self.payload.is_some()
    }
}

// ═══════════════════════════════════════════════════════════
// Report request & outcome
// ═══════════════════════════════════════════════════════════

/// Everything the report client needs for one completion call.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Token accounting returned by the report service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Terminal record of one report-generation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub success: bool,
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
    pub error: Option<ErrorKind>,
}

impl ReportOutcome {
    pub fn succeeded(content: String, usage: Option<TokenUsage>) -> Self {
        Self {
            success: true,
            content: Some(content),
            usage,
            error: None,
        }
    }

    pub fn failed(error: ErrorKind) -> Self {
        Self {
            success: false,
            content: None,
            usage: None,
            error: Some(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Scan.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
    }

    #[test]
    fn missing_or_empty_extension_is_none() {
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension("trailing."), None);
        assert_eq!(file_extension(""), None);
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = Artifact::new("a.csv", b"time,signal\n0,1\n".to_vec());
        let b = Artifact::new("b.csv", b"time,signal\n0,1\n".to_vec());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert!(a.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn blank_task_detection() {
        let blank = Task::new("  ", Artifact::new("", Vec::new()));
        assert!(blank.is_blank());

        let text_only = Task::new("боль в груди", Artifact::new("", Vec::new()));
        assert!(!text_only.is_blank());

        let file_only = Task::new("", Artifact::new("ecg.csv", b"1".to_vec()));
        assert!(!file_only.is_blank());
    }

    #[test]
    fn failed_extraction_has_no_payload() {
        let result = ExtractionResult::failed(
            ModalityTag::Lab,
            ErrorKind::ExtractionFailed {
                modality: ModalityTag::Lab,
                cause: "bad csv".into(),
            },
        );
        assert!(result.payload().is_none());
        assert!(result.error().is_some());
        assert!(!result.is_success());
        assert!(result.summary().contains("bad csv"));
    }

    #[test]
    fn unrecognized_result_is_unknown_modality() {
        let result = ExtractionResult::unrecognized();
        assert_eq!(result.modality(), ModalityTag::Unknown);
        assert_eq!(result.error(), Some(&ErrorKind::UnrecognizedArtifact));
    }

    #[test]
    fn only_rate_limit_and_upstream_are_retriable() {
        assert!(ErrorKind::RateLimited.is_retriable());
        assert!(ErrorKind::UpstreamError.is_retriable());
        assert!(!ErrorKind::AuthFailure.is_retriable());
        assert!(!ErrorKind::MissingCredential.is_retriable());
        assert!(!ErrorKind::Timeout { seconds: 60 }.is_retriable());
    }

    #[test]
    fn error_kind_serializes_tagged() {
        let json = serde_json::to_string(&ErrorKind::UnexpectedStatus {
            code: 418,
            body: "teapot".into(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"unexpected_status\""));
        assert!(json.contains("\"code\":418"));
    }

    #[test]
    fn modality_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&ModalityTag::Ecg).unwrap(), "\"ECG\"");
        assert_eq!(ModalityTag::Document.to_string(), "DOCUMENT");
    }
}
