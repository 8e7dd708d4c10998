use crate::{
    AppState,
    jobs::model::{CancelResponse, JobId, JobStatusResponse, JobSummary},
    types::Result,
};
use axum::{
    Json,
    extract::{Path, State},
};

/// List all jobs, newest first
#[utoipa::path(
    get,
    path = "/jobs",
    responses((status = 200, description = "Known jobs", body = Vec<JobSummary>)),
    tag = "jobs"
)]
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.orchestrator.list())
}

/// Status and result of a job
#[utoipa::path(
    get,
    path = "/jobs/{research_id}",
    params(("research_id" = String, Path, description = "Job identity")),
    responses(
        (status = 200, description = "Job state", body = JobStatusResponse),
        (status = 404, description = "Unknown job")
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    let lookup = state.orchestrator.get_result(&research_id)?;
    Ok(Json(JobStatusResponse::new(JobId::from(research_id), lookup)))
}

/// Request cancellation of a job
#[utoipa::path(
    post,
    path = "/jobs/{research_id}/cancel",
    params(("research_id" = String, Path, description = "Job identity")),
    responses(
        (status = 200, description = "Cancellation outcome", body = CancelResponse),
        (status = 404, description = "Unknown job")
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let outcome = state.orchestrator.cancel(&research_id)?;
    Ok(Json(CancelResponse {
        research_id: JobId::from(research_id),
        outcome,
    }))
}
