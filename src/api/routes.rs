use crate::AppState;
use crate::api::handlers::{files, health, jobs, reports};
use crate::utils::toml_config::QuarryConfig;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use super::ApiDoc;

pub fn create_router(config: &QuarryConfig) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health::health))
        // Reports
        .route("/report", post(reports::submit_report))
        .route("/report/{research_id}", get(reports::get_report))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{research_id}", get(jobs::get_job))
        .route("/jobs/{research_id}/cancel", post(jobs::cancel_job))
        // Documents
        .route("/files", get(files::list_files))
        .route("/upload", post(files::upload_file))
        .route("/files/{filename}", delete(files::delete_file))
        .route("/knowledge-bases", get(files::list_knowledge_bases))
        // Streaming
        .route("/ws", get(crate::api::ws::ws_handler));

    let router = with_docs(router)
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http());

    tracing::debug!(origins = ?config.server.cors_origins, "router configured");
    router
}

#[cfg(not(feature = "swagger-ui"))]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    router.route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}

#[cfg(feature = "swagger-ui")]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    use utoipa_swagger_ui::SwaggerUi;

    router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
