//! Job records, parameters and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::types::AppError;

/// Opaque, storage-safe job identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============= Enumerated Parameters =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ResearchReport,
    ResourceReport,
    OutlineReport,
    CustomReport,
    DetailedReport,
    SubtopicReport,
    Deep,
    MultiAgents,
}

impl ReportType {
    pub const ALL: [ReportType; 8] = [
        ReportType::ResearchReport,
        ReportType::ResourceReport,
        ReportType::OutlineReport,
        ReportType::CustomReport,
        ReportType::DetailedReport,
        ReportType::SubtopicReport,
        ReportType::Deep,
        ReportType::MultiAgents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ResearchReport => "research_report",
            ReportType::ResourceReport => "resource_report",
            ReportType::OutlineReport => "outline_report",
            ReportType::CustomReport => "custom_report",
            ReportType::DetailedReport => "detailed_report",
            ReportType::SubtopicReport => "subtopic_report",
            ReportType::Deep => "deep",
            ReportType::MultiAgents => "multi_agents",
        }
    }

    /// Multi-agent runs deliver their output only as rendered artifacts, so a
    /// render failure fails the job.
    pub fn requires_artifacts(&self) -> bool {
        matches!(self, ReportType::MultiAgents)
    }
}

impl FromStr for ReportType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown report_type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Web,
    Local,
    Hybrid,
    Azure,
    LangchainDocuments,
    LangchainVectorstore,
    Static,
}

impl ReportSource {
    pub const ALL: [ReportSource; 7] = [
        ReportSource::Web,
        ReportSource::Local,
        ReportSource::Hybrid,
        ReportSource::Azure,
        ReportSource::LangchainDocuments,
        ReportSource::LangchainVectorstore,
        ReportSource::Static,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Web => "web",
            ReportSource::Local => "local",
            ReportSource::Hybrid => "hybrid",
            ReportSource::Azure => "azure",
            ReportSource::LangchainDocuments => "langchain_documents",
            ReportSource::LangchainVectorstore => "langchain_vectorstore",
            ReportSource::Static => "static",
        }
    }
}

impl FromStr for ReportSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportSource::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown report_source '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Tone {
    Objective,
    Formal,
    Analytical,
    Persuasive,
    Informative,
    Explanatory,
    Descriptive,
    Critical,
    Comparative,
    Speculative,
    Reflective,
    Narrative,
    Humorous,
    Optimistic,
    Pessimistic,
}

impl Tone {
    pub const ALL: [Tone; 15] = [
        Tone::Objective,
        Tone::Formal,
        Tone::Analytical,
        Tone::Persuasive,
        Tone::Informative,
        Tone::Explanatory,
        Tone::Descriptive,
        Tone::Critical,
        Tone::Comparative,
        Tone::Speculative,
        Tone::Reflective,
        Tone::Narrative,
        Tone::Humorous,
        Tone::Optimistic,
        Tone::Pessimistic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Objective => "Objective",
            Tone::Formal => "Formal",
            Tone::Analytical => "Analytical",
            Tone::Persuasive => "Persuasive",
            Tone::Informative => "Informative",
            Tone::Explanatory => "Explanatory",
            Tone::Descriptive => "Descriptive",
            Tone::Critical => "Critical",
            Tone::Comparative => "Comparative",
            Tone::Speculative => "Speculative",
            Tone::Reflective => "Reflective",
            Tone::Narrative => "Narrative",
            Tone::Humorous => "Humorous",
            Tone::Optimistic => "Optimistic",
            Tone::Pessimistic => "Pessimistic",
        }
    }
}

impl FromStr for Tone {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tone::ALL
            .into_iter()
            .find(|tone| tone.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Validation(format!("Unknown tone '{}'", s)))
    }
}

// ============= Job Parameters =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Background,
    Foreground,
}

/// Validated execution parameters.
///
/// Storage locations are resolved at admission and carried here, so a running
/// job never reads shared configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub task: String,
    pub report_type: ReportType,
    pub report_source: ReportSource,
    pub tone: Tone,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub repo_name: String,
    pub branch_name: String,
    pub knowledge_base: Option<String>,
    pub depth: u32,
    pub breadth: u32,
    pub doc_path: PathBuf,
    pub vector_store_path: Option<PathBuf>,
}

// ============= Lifecycle =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Pending -> Running -> {Completed, Failed}. Pending -> Failed covers a
    /// job cancelled before it started.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============= Results =============

/// What the research computation hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResearchOutput {
    pub report: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub visited_urls: Vec<String>,
    #[serde(default)]
    pub costs: f64,
    #[serde(default)]
    pub images: Vec<String>,
}

/// A rendered file derived from a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Artifact {
    /// File extension, e.g. `md`
    pub format: String,
    #[schema(value_type = String)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobResult {
    pub research_id: JobId,
    pub report: String,
    pub artifacts: Vec<Artifact>,
    pub source_urls: Vec<String>,
    pub visited_urls: Vec<String>,
    pub research_costs: f64,
    pub research_images: Vec<String>,
    /// Set when the report was produced but could not be rendered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
}

impl JobResult {
    pub fn from_output(research_id: JobId, report_type: ReportType, output: ResearchOutput) -> Self {
        let report = if report_type == ReportType::MultiAgents {
            String::new()
        } else {
            output.report
        };

        Self {
            research_id,
            report,
            artifacts: Vec::new(),
            source_urls: output.source_urls,
            visited_urls: output.visited_urls,
            research_costs: output.costs,
            research_images: output.images,
            render_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Execution,
    Cancelled,
    Resource,
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled by request")
    }
}

impl From<&AppError> for JobError {
    fn from(err: &AppError) -> Self {
        let kind = match err {
            AppError::Resource(_) => FailureKind::Resource,
            _ => FailureKind::Execution,
        };
        Self::new(kind, err.message())
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The orchestrator's view of one job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub params: JobParams,
    pub mode: JobMode,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, params: JobParams, mode: JobMode) -> Self {
        Self {
            id,
            params,
            mode,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a state transition, refusing anything non-monotonic.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => self.finished_at = Some(now),
            JobStatus::Pending => {}
        }
        self.status = next;
        true
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            research_id: self.id.clone(),
            task: self.params.task.clone(),
            report_type: self.params.report_type,
            mode: self.mode,
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSummary {
    pub research_id: JobId,
    pub task: String,
    pub report_type: ReportType,
    pub mode: JobMode,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ============= Orchestrator Answers =============

/// Answer to a result query.
#[derive(Debug, Clone, PartialEq)]
pub enum JobLookup {
    /// Not finished yet (Pending or Running)
    Pending { status: JobStatus },
    Completed(JobResult),
    Failed {
        error: JobError,
        /// Whatever was produced before the failure
        result: Option<JobResult>,
    },
}

/// Wire form of [`JobLookup`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobStatusResponse {
    pub research_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobStatusResponse {
    pub fn new(research_id: JobId, lookup: JobLookup) -> Self {
        match lookup {
            JobLookup::Pending { status } => Self {
                research_id,
                status,
                result: None,
                error: None,
            },
            JobLookup::Completed(result) => Self {
                research_id,
                status: JobStatus::Completed,
                result: Some(result),
                error: None,
            },
            JobLookup::Failed { error, result } => Self {
                research_id,
                status: JobStatus::Failed,
                result,
                error: Some(error),
            },
        }
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Background job accepted
    Queued { research_id: JobId },
    /// Foreground job finished successfully
    Finished(JobResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job will be marked failed once the computation yields
    Requested,
    /// Nothing to cancel
    AlreadyFinished,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub research_id: JobId,
    pub outcome: CancelOutcome,
}
