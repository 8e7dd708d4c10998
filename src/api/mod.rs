//! HTTP API Handlers and Routes
//!
//! This module provides the service boundary of Quarry, built on the Axum web
//! framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//! - [`api::ws`](crate::api::ws) - WebSocket gateway and control protocol
//!
//! # API Endpoints
//!
//! ## Reports
//! - `POST /report` - Submit a research job
//! - `GET /report/{research_id}` - Download the rendered report
//!
//! ## Jobs
//! - `GET /jobs` - List jobs, newest first
//! - `GET /jobs/{research_id}` - Job status and result
//! - `POST /jobs/{research_id}/cancel` - Request cancellation
//!
//! ## Documents
//! - `GET /files` - List documents (`?knowledge_base=` to scope)
//! - `POST /upload` - Upload a document (multipart `file`, optional `knowledge_base`)
//! - `DELETE /files/{filename}` - Delete a document
//! - `GET /knowledge-bases` - List knowledge bases
//!
//! ## Streaming
//! - `GET /ws` - WebSocket with job events and a JSON control protocol
//!
//! ## Health
//! - `GET /health` - Liveness check
//!
//! # OpenAPI Documentation
//!
//! The OpenAPI document is served at `/api-docs/openapi.json`. When the
//! `swagger-ui` feature is enabled, interactive API documentation is
//! available at `/swagger-ui/`.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
/// WebSocket gateway.
pub mod ws;

use utoipa::OpenApi;

use crate::jobs::model::{
    Artifact, CancelOutcome, CancelResponse, FailureKind, JobError, JobId, JobMode, JobResult,
    JobStatus, JobStatusResponse, JobSummary, ReportType,
};
use crate::types::{
    DeepResearchConfig, FileListResponse, KnowledgeBaseListResponse, MessageResponse,
    QueuedResponse, ResearchRequest, UploadResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "Quarry", description = "Research job orchestration and streaming"),
    paths(
        handlers::health::health,
        handlers::reports::submit_report,
        handlers::reports::get_report,
        handlers::jobs::list_jobs,
        handlers::jobs::get_job,
        handlers::jobs::cancel_job,
        handlers::files::list_files,
        handlers::files::upload_file,
        handlers::files::delete_file,
        handlers::files::list_knowledge_bases,
    ),
    components(schemas(
        ResearchRequest,
        DeepResearchConfig,
        QueuedResponse,
        MessageResponse,
        FileListResponse,
        UploadResponse,
        KnowledgeBaseListResponse,
        JobId,
        JobMode,
        JobStatus,
        JobSummary,
        JobResult,
        JobError,
        FailureKind,
        JobStatusResponse,
        Artifact,
        ReportType,
        CancelOutcome,
        CancelResponse,
    )),
    tags(
        (name = "reports", description = "Research submission and report download"),
        (name = "jobs", description = "Job tracking"),
        (name = "documents", description = "Documents and knowledge bases"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;
