pub mod chat_types;
pub mod client;
pub mod request;
pub mod retry;
pub mod vision;

pub use client::{interpret_response, MockReportGenerator, ReportClient, ReportGenerator};
pub use request::ReportRequestBuilder;
pub use retry::{RetryPolicy, RetryingGenerator};
pub use vision::RemoteVision;
