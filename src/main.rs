//! # MedAssist CLI (`medassist`)
//!
//! ```bash
//! # Full pipeline: classify, extract, request a report
//! OPENROUTER_API_KEY=sk-... medassist analyze --task "Расшифруйте ЭКГ" --file trace.csv --sampling-rate 500
//!
//! # Machine-readable response, with up to 3 attempts on 429/500
//! medassist analyze --task "Общий анализ крови" --file panel.xlsx --retries 3 --json
//!
//! # Offline: which modality would this be routed to?
//! medassist classify --task "Рентген грудной клетки" --file chest.png
//! ```
//!
//! Exit codes: 0 report produced, 1 report failed, 2 invalid input or configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use medassist_lib::config::{self, AppConfig};
use medassist_lib::pipeline::intent::classify_with_hint;
use medassist_lib::pipeline::report::RetryPolicy;
use medassist_lib::pipeline::{AnalysisRequest, AnalysisResponse, PipelineOrchestrator};

const EXIT_REPORT_FAILED: u8 = 1;
const EXIT_INVALID: u8 = 2;

#[derive(Parser)]
#[command(
    name = "medassist",
    version,
    about = "Route a medical artifact to the right extractor and request a diagnostic report"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and print the report.
    Analyze {
        /// Free-text clinical task.
        #[arg(long, default_value = "")]
        task: String,

        /// Artifact to analyze (ECG trace, lab panel, image or document).
        #[arg(long)]
        file: Option<PathBuf>,

        /// Sampling rate of an ECG trace, in Hz.
        #[arg(long, value_parser = parse_sampling_rate)]
        sampling_rate: Option<f64>,

        /// Total attempts for rate-limited or upstream failures.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=10))]
        retries: u32,

        /// Print the full response as JSON instead of the report text.
        #[arg(long)]
        json: bool,

        /// Override the report model.
        #[arg(long)]
        model: Option<String>,

        /// Enable remote image analysis and image OCR with this model.
        #[arg(long)]
        vision_model: Option<String>,
    },

    /// Print the modality the artifact would be routed to. No network access.
    Classify {
        #[arg(long, default_value = "")]
        task: String,

        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn parse_sampling_rate(raw: &str) -> Result<f64, String> {
    config::parse_positive_float("--sampling-rate", raw).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    medassist_lib::init_tracing();

    match cli.command {
        Commands::Classify { task, file } => {
            let (file_name, bytes) = match read_artifact(file.as_deref()) {
                Ok(artifact) => artifact,
                Err(code) => return code,
            };
            let content = (!bytes.is_empty()).then_some(bytes.as_slice());
            println!("{}", classify_with_hint(&task, &file_name, content));
            ExitCode::SUCCESS
        }
        Commands::Analyze {
            task,
            file,
            sampling_rate,
            retries,
            json,
            model,
            vision_model,
        } => {
            let mut config = match AppConfig::from_env() {
                Ok(config) => config,
                Err(e) => return invalid(&e.to_string()),
            };
            if let Some(model) = model {
                config.report.model = model;
            }
            if vision_model.is_some() {
                config.report.vision_model = vision_model;
            }

            let (file_name, file_bytes) = match read_artifact(file.as_deref()) {
                Ok(artifact) => artifact,
                Err(code) => return code,
            };

            let orchestrator = match PipelineOrchestrator::from_config(&config) {
                Ok(orchestrator) => orchestrator.with_retry(RetryPolicy {
                    max_attempts: retries,
                    ..RetryPolicy::default()
                }),
                Err(e) => return invalid(&e.to_string()),
            };

            let request = AnalysisRequest {
                description: task,
                file_bytes,
                file_name,
                sampling_rate_hz: sampling_rate,
            };
            match orchestrator.analyze(&request) {
                Ok(response) => print_response(&response, json),
                Err(e) => invalid(&e.to_string()),
            }
        }
    }
}

/// File name and bytes of the artifact, or an empty artifact when no file was given.
fn read_artifact(path: Option<&Path>) -> Result<(String, Vec<u8>), ExitCode> {
    let Some(path) = path else {
        return Ok((String::new(), Vec::new()));
    };
    let bytes = std::fs::read(path)
        .map_err(|e| invalid(&format!("Cannot read {}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((file_name, bytes))
}

fn print_response(response: &AnalysisResponse, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(response) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                return ExitCode::from(EXIT_REPORT_FAILED);
            }
        }
    } else {
        eprintln!("[{}] {}", response.modality, response.extraction_summary);
        for warning in &response.warnings {
            eprintln!("warning: {warning}");
        }
        match &response.report_text {
            Some(text) => println!("{text}"),
            None => {
                for error in &response.errors {
                    eprintln!("error: {error}");
                }
            }
        }
    }

    if response.report_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REPORT_FAILED)
    }
}

fn invalid(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::from(EXIT_INVALID)
}
