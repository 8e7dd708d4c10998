use serde::{Deserialize, Serialize};

use crate::jobs::model::{JobError, JobId, JobResult, JobStatus};

/// A notification pushed to connected clients.
///
/// Serialized with a `type` tag so the wire format matches what research
/// frontends already consume (`{"type": "logs", "content": ..., "output": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Progress line from the research computation
    Logs {
        research_id: JobId,
        content: String,
        output: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        metadata: serde_json::Value,
    },
    /// Streamed report text
    Report { research_id: JobId, output: String },
    Status {
        research_id: JobId,
        status: JobStatus,
    },
    Completed {
        research_id: JobId,
        result: JobResult,
    },
    Error {
        research_id: JobId,
        error: JobError,
    },
    /// Not tied to a job; every connection receives it
    Notice { content: String },
}

impl JobEvent {
    pub fn research_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::Logs { research_id, .. }
            | JobEvent::Report { research_id, .. }
            | JobEvent::Status { research_id, .. }
            | JobEvent::Completed { research_id, .. }
            | JobEvent::Error { research_id, .. } => Some(research_id),
            JobEvent::Notice { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Logs { .. } => "logs",
            JobEvent::Report { .. } => "report",
            JobEvent::Status { .. } => "status",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Error { .. } => "error",
            JobEvent::Notice { .. } => "notice",
        }
    }
}
