//! Pipeline orchestrator: classify → normalize → build request → generate.
//!
//! Each call owns every record it creates; concurrent calls on a shared
//! orchestrator need no coordination.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::diagnostic::{
    dump_dir_for, dump_json, dump_text, EXTRACTION_FILE, REPORT_OUTCOME_FILE, REPORT_REQUEST_FILE,
    TASK_FILE,
};
use super::extraction::pdf::DocumentTextRecognizer;
use super::extraction::{ArtifactNormalizer, Capabilities};
use super::intent::classify_with_hint;
use super::report::{
    RemoteVision, ReportClient, ReportGenerator, ReportRequestBuilder, RetryPolicy, RetryingGenerator,
};
use super::types::{
    Artifact, ErrorKind, ExtractionResult, ModalityTag, ReportOutcome, ReportRequest, Task, TokenUsage,
};
use crate::config::{AppConfig, ConfigError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Task has neither a file nor a description")]
    EmptyTask,
}

/// Both halves of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub extraction: ExtractionResult,
    pub report: ReportOutcome,
}

/// Caller-facing input.
#[derive(Clone, Default)]
pub struct AnalysisRequest {
    pub description: String,
    pub file_bytes: Vec<u8>,
    pub file_name: String,
    pub sampling_rate_hz: Option<f64>,
}

/// Caller-facing output.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub request_id: Uuid,
    pub fingerprint: String,
    pub modality: ModalityTag,
    pub extraction_summary: String,
    pub report_text: Option<String>,
    pub usage: Option<TokenUsage>,
    pub errors: Vec<ErrorKind>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisResponse {
    pub fn report_succeeded(&self) -> bool {
        self.report_text.is_some()
    }
}

/// What `00-task.json` records. The description is deliberately absent.
#[derive(Serialize)]
struct TaskManifest<'a> {
    request_id: Uuid,
    file_name: &'a str,
    size: usize,
    fingerprint: String,
    modality: ModalityTag,
    sampling_rate_hz: Option<f64>,
}

pub struct PipelineOrchestrator {
    normalizer: ArtifactNormalizer,
    builder: ReportRequestBuilder,
    generator: Arc<dyn ReportGenerator>,
    dump_dir: Option<PathBuf>,
}

impl PipelineOrchestrator {
    pub fn new(
        normalizer: ArtifactNormalizer,
        builder: ReportRequestBuilder,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self {
            normalizer,
            builder,
            generator,
            dump_dir: None,
        }
    }

    /// Wire the production capabilities and the remote report client.
    ///
    /// With a vision model configured, images get remote findings and scanned
    /// documents get remote OCR; otherwise both stay local.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let client = Arc::new(ReportClient::new(config.report.clone())?);

        let mut capabilities = Capabilities::local();
        if let Some(model) = &config.report.vision_model {
            let vision = Arc::new(RemoteVision::new(client.clone(), model.clone()));
            capabilities.vision = Some(vision.clone());
            capabilities.text = Arc::new(DocumentTextRecognizer::with_image_ocr(vision));
        }

        tracing::info!(
            model = %config.report.model,
            vision = config.report.vision_model.is_some(),
            dumps = config.dump_dir.is_some(),
            "Pipeline configured"
        );

        Ok(Self::new(
            ArtifactNormalizer::new(capabilities, &config.pipeline),
            ReportRequestBuilder::new(&config.pipeline),
            client,
        )
        .with_dump_dir(config.dump_dir.clone()))
    }

    pub fn with_dump_dir(mut self, dump_dir: Option<PathBuf>) -> Self {
        self.dump_dir = dump_dir;
        self
    }

    /// Opt into retrying retriable report failures. The pipeline still makes
    /// one `generate` call per task; the wrapper does the looping.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        if policy.max_attempts > 1 {
            self.generator = Arc::new(RetryingGenerator::new(self.generator, policy));
        }
        self
    }

    /// Run one task end to end.
    ///
    /// Only a blank task (no bytes, no description) is an `Err`. Extraction
    /// and report failures come back inside the `PipelineRun`.
    pub fn run(&self, task: &Task) -> Result<PipelineRun, PipelineError> {
        if task.is_blank() {
            tracing::warn!(request_id = %task.id, "Rejecting blank task");
            return Err(PipelineError::EmptyTask);
        }

        let span = tracing::info_span!("pipeline_run", request_id = %task.id);
        let _guard = span.enter();
        let start = Instant::now();

        let content = (!task.artifact.is_empty()).then_some(task.artifact.bytes.as_slice());
        let tag = classify_with_hint(&task.description, &task.artifact.file_name, content);
        tracing::info!(modality = %tag, bytes = task.artifact.len(), "Task classified");

        let dump = dump_dir_for(self.dump_dir.as_deref(), &task.id);
        if let Some(dir) = &dump {
            dump_json(dir, TASK_FILE, &manifest(task, tag));
        }

        let extraction = if tag == ModalityTag::Unknown {
            ExtractionResult::unrecognized()
        } else {
            self.normalizer.normalize(tag, task)
        };
        if let Some(dir) = &dump {
            dump_json(dir, EXTRACTION_FILE, &extraction);
        }

        let request = self.builder.build(task, &extraction);
        if let Some(dir) = &dump {
            dump_text(dir, REPORT_REQUEST_FILE, &render_request(&request));
        }

        let report = self.generator.generate(&request);
        if let Some(dir) = &dump {
            dump_json(dir, REPORT_OUTCOME_FILE, &report);
        }

        tracing::info!(
            modality = %tag,
            extracted = extraction.is_success(),
            report_ok = report.success,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline finished"
        );

        Ok(PipelineRun { extraction, report })
    }

    /// The single caller-facing entry point.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, PipelineError> {
        let mut task = Task::new(
            request.description.clone(),
            Artifact::new(request.file_name.clone(), request.file_bytes.clone()),
        );
        if let Some(hz) = request.sampling_rate_hz {
            task = task.with_sampling_rate(hz);
        }

        let run = self.run(&task)?;

        let errors = run
            .extraction
            .error()
            .cloned()
            .into_iter()
            .chain(run.report.error.clone())
            .collect();

        Ok(AnalysisResponse {
            request_id: task.id,
            fingerprint: task.artifact.fingerprint(),
            modality: run.extraction.modality(),
            extraction_summary: run.extraction.summary().to_string(),
            report_text: run.report.content,
            usage: run.report.usage,
            errors,
            warnings: run.extraction.warnings().to_vec(),
            generated_at: Utc::now(),
        })
    }
}

fn manifest(task: &Task, modality: ModalityTag) -> TaskManifest<'_> {
    TaskManifest {
        request_id: task.id,
        file_name: &task.artifact.file_name,
        size: task.artifact.len(),
        fingerprint: task.artifact.fingerprint(),
        modality,
        sampling_rate_hz: task.sampling_rate_hz,
    }
}

fn render_request(request: &ReportRequest) -> String {
    format!(
        "# max_tokens={} temperature={} top_p={}\n\n## system\n{}\n\n## user\n{}\n",
        request.max_tokens, request.temperature, request.top_p, request.system_prompt, request.user_prompt
    )
}
