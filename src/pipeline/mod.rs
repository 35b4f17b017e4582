pub mod types;
pub mod intent;
pub mod extraction;
pub mod report;
pub mod orchestrator; // classify → normalize → report, one call per task
pub mod diagnostic; // Per-request dumps (MEDASSIST_DUMP_DIR)

pub use orchestrator::{AnalysisRequest, AnalysisResponse, PipelineError, PipelineOrchestrator, PipelineRun};
