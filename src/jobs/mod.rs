//! Research job lifecycle.
//!
//! - [`model`] - job records, parameters, results and state transitions
//! - [`id`] - storage-safe job identities
//! - [`runner`] - one execution of the research engine with progress forwarding
//! - [`render`] - report rendering into downloadable artifacts
//! - [`orchestrator`] - admission, execution, cancellation and queries

pub mod id;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod runner;

pub use model::{
    CancelOutcome, Job, JobError, JobId, JobLookup, JobMode, JobParams, JobResult, JobStatus,
    JobSummary, SubmitOutcome,
};
pub use orchestrator::JobOrchestrator;
pub use render::{MarkdownRenderer, ReportRenderer};
pub use runner::{JobRunner, ProgressSink, ProgressUpdate};
