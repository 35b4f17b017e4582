//! Process-wide configuration, created once at startup and passed explicitly.
//!
//! Values come from environment variables; the command-line adapter may
//! override individual fields. Nothing here is read lazily from globals.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "MedAssist";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medassist_lib=info,medassist=info,warn"
}

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "anthropic/claude-3-sonnet-20240229";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REFERER: &str = "https://medassistant-cld.local";
const DEFAULT_APP_TITLE: &str = "MedAssistant";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidInteger { name: &'static str, value: String },

    #[error("{name} must be a positive number, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Report endpoint must be an http(s) URL, got '{0}'")]
    InvalidEndpoint(String),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),
}

// ═══════════════════════════════════════════════════════════
// Report client
// ═══════════════════════════════════════════════════════════

/// Connection settings for the remote completion endpoint.
#[derive(Clone)]
pub struct ReportClientConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    /// Vision-capable model; enables image analysis and image OCR when set.
    pub vision_model: Option<String>,
    pub timeout_secs: u64,
    pub referer: String,
    pub app_title: String,
}

impl Default for ReportClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            vision_model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            referer: DEFAULT_REFERER.to_string(),
            app_title: DEFAULT_APP_TITLE.to_string(),
        }
    }
}

impl fmt::Debug for ReportClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportClientConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ReportClientConfig {
    /// Check values that would otherwise only fail at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidInteger {
                name: "timeout_secs",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

/// Size bounds and generation parameters for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Cap on the serialized extraction payload inside the prompt.
    pub max_context_chars: usize,
    /// Cap on the whole user prompt.
    pub max_prompt_chars: usize,
    /// Cap on recognized document text kept in the payload.
    pub max_document_chars: usize,
    /// Uploads above this size are not decoded.
    pub max_artifact_bytes: usize,
    /// Used for waveforms that neither declare nor reveal their rate.
    pub default_sampling_rate_hz: f64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 2000,
            max_prompt_chars: 6000,
            max_document_chars: 4000,
            max_artifact_bytes: 50 * 1024 * 1024,
            default_sampling_rate_hz: 500.0,
            max_tokens: 1400,
            temperature: 0.1,
            top_p: 1.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Application
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub report: ReportClientConfig,
    pub pipeline: PipelineSettings,
    /// Per-request diagnostic dumps are written here when set.
    pub dump_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (testable without touching the
    /// process environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.report.api_key = var("OPENROUTER_API_KEY").or_else(|| var("MEDASSIST_API_KEY"));
        if let Some(endpoint) = var("MEDASSIST_ENDPOINT") {
            config.report.endpoint = endpoint;
        }
        if let Some(model) = var("MEDASSIST_MODEL") {
            config.report.model = model;
        }
        config.report.vision_model = var("MEDASSIST_VISION_MODEL");
        if let Some(raw) = var("MEDASSIST_TIMEOUT_SECS") {
            config.report.timeout_secs = parse_positive_int("MEDASSIST_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = var("MEDASSIST_SAMPLING_RATE_HZ") {
            config.pipeline.default_sampling_rate_hz =
                parse_positive_float("MEDASSIST_SAMPLING_RATE_HZ", &raw)?;
        }
        config.dump_dir = var("MEDASSIST_DUMP_DIR").map(PathBuf::from);

        config.report.validate()?;
        Ok(config)
    }
}

fn parse_positive_int(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidInteger {
            name,
            value: raw.to_string(),
        }),
    }
}

pub fn parse_positive_float(name: &'static str, raw: &str) -> Result<f64, ConfigError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}
