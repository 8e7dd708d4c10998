use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

// ============= API Request/Response Types =============

/// Body of a research submission, as sent over HTTP or inside a WebSocket
/// `start` command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResearchRequest {
    pub task: String,
    pub report_type: String,
    pub report_source: String,
    pub tone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_research_config: Option<DeepResearchConfig>,
    #[serde(default = "default_true")]
    pub generate_in_background: bool,
}

fn default_true() -> bool {
    true
}

/// Optional tuning for nested (deep) research.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeepResearchConfig {
    /// Depth: number of research iterations
    pub max_iterations: Option<i64>,
    /// Breadth: sources considered per query
    pub max_search_results_per_query: Option<i64>,
}

/// Acknowledgement returned for a background submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueuedResponse {
    pub message: String,
    pub research_id: String,
}

/// Plain `{"message": ...}` body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileListResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeBaseListResponse {
    pub knowledge_bases: Vec<String>,
}

/// Optional knowledge base scoping for document routes.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KnowledgeBaseQuery {
    pub knowledge_base: Option<String>,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Research failed: {0}")]
    Execution(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Connection overloaded: {0}")]
    Overload(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap an I/O failure with the operation it interrupted.
    pub fn resource(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        AppError::Resource(format!("{}: {}", context, err))
    }

    /// The message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::Validation(m)
            | AppError::NotFound(m)
            | AppError::Execution(m)
            | AppError::Resource(m)
            | AppError::Overload(m)
            | AppError::Unavailable(m)
            | AppError::Config(m)
            | AppError::Internal(m) => m,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<crate::utils::toml_config::ConfigError> for AppError {
    fn from(err: crate::utils::toml_config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Overload(_) | AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Execution(_)
            | AppError::Resource(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
