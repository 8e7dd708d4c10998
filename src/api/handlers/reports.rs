use crate::{
    AppState,
    jobs::{SubmitOutcome, orchestrator::QUEUED_MESSAGE, render::find_artifact},
    types::{AppError, MessageResponse, QueuedResponse, ResearchRequest, Result},
};
use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

/// Submit a research job
///
/// Background submissions (the default) return immediately with the job's
/// identity; foreground submissions wait for the finished result.
#[utoipa::path(
    post,
    path = "/report",
    request_body = ResearchRequest,
    responses(
        (status = 200, description = "Job queued, or the finished result in foreground mode", body = QueuedResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Research failed")
    ),
    tag = "reports"
)]
pub async fn submit_report(
    State(state): State<AppState>,
    Json(payload): Json<ResearchRequest>,
) -> Result<Response> {
    match state.orchestrator.submit(payload, None).await? {
        SubmitOutcome::Queued { research_id } => Ok(Json(QueuedResponse {
            message: QUEUED_MESSAGE.to_string(),
            research_id: research_id.to_string(),
        })
        .into_response()),
        SubmitOutcome::Finished(result) => Ok(Json(result).into_response()),
    }
}

/// Download a rendered report
#[utoipa::path(
    get,
    path = "/report/{research_id}",
    params(("research_id" = String, Path, description = "Job identity")),
    responses(
        (status = 200, description = "Report file, or a not-found message", body = MessageResponse)
    ),
    tag = "reports"
)]
pub async fn get_report(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> Result<Response> {
    let Some(path) = find_artifact(&state.outputs_dir, &research_id).await else {
        return Ok(Json(MessageResponse {
            message: "Report not found.".to_string(),
        })
        .into_response());
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::resource(format!("reading {}", path.display()), e))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| research_id.clone());

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
