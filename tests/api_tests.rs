mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use common::mocks::MockResearchEngine;
use quarry::AppState;
use quarry::jobs::JobLookup;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    server: TestServer,
    state: AppState,
    _dir: TempDir,
}

fn harness(engine: MockResearchEngine) -> Harness {
    harness_shared(Arc::new(engine))
}

fn harness_shared(engine: Arc<MockResearchEngine>) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let state = common::test_state(&dir, engine);
    let server =
        TestServer::new(quarry::app(state.clone())).expect("Failed to create test server");
    Harness {
        server,
        state,
        _dir: dir,
    }
}

fn request(task: &str) -> Value {
    json!({
        "task": task,
        "report_type": "research_report",
        "report_source": "local",
        "tone": "Objective"
    })
}

async fn submit_queued(h: &Harness, body: &Value) -> String {
    let response = h.server.post("/report").json(body).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(
        body["message"],
        "Your report is being generated in the background. Please check back later."
    );
    body["research_id"]
        .as_str()
        .expect("research_id missing")
        .to_string()
}

// ============= Health & Docs =============

#[tokio::test]
async fn test_health_check() {
    let h = harness(MockResearchEngine::new("report"));

    let response = h.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let h = harness(MockResearchEngine::new("report"));

    let response = h.server.get("/api-docs/openapi.json").await;
    response.assert_status_ok();
    let doc: Value = response.json();
    for path in ["/report", "/report/{research_id}", "/jobs", "/upload", "/knowledge-bases"] {
        assert!(doc["paths"][path].is_object(), "{path} not documented");
    }
}

// ============= Reports =============

#[tokio::test]
async fn test_background_submission_completes() {
    let h = harness(MockResearchEngine::new("# Rust adoption\n\nIt is growing."));

    let research_id = submit_queued(&h, &request("rust adoption")).await;
    assert!(research_id.starts_with("task_"));
    assert!(research_id.ends_with("_rust_adoption"));

    let lookup = h
        .state
        .orchestrator
        .wait_for_completion(&research_id)
        .await
        .unwrap();
    assert!(matches!(lookup, JobLookup::Completed(_)));

    let response = h.server.get(&format!("/jobs/{}", research_id)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["report"], "# Rust adoption\n\nIt is growing.");
    assert_eq!(body["result"]["source_urls"][0], "https://example.com/source");
    assert_eq!(body["result"]["artifacts"][0]["format"], "md");
}

#[tokio::test]
async fn test_each_submission_runs_the_engine_once() {
    let engine = Arc::new(MockResearchEngine::new("# Once"));
    let h = harness_shared(Arc::clone(&engine));

    let mut ids = Vec::new();
    for task in ["first topic", "second topic", "third topic"] {
        ids.push(submit_queued(&h, &request(task)).await);
    }
    let mut foreground = request("fourth topic");
    foreground["generate_in_background"] = json!(false);
    h.server.post("/report").json(&foreground).await.assert_status_ok();

    for research_id in &ids {
        h.state
            .orchestrator
            .wait_for_completion(research_id)
            .await
            .unwrap();
    }
    assert_eq!(engine.calls(), 4);
    assert_eq!(h.state.orchestrator.len(), 4);
}

#[tokio::test]
async fn test_foreground_submission_returns_result_and_artifact() {
    let h = harness(MockResearchEngine::new("# Foreground\n\nDone."));

    let mut body = request("foreground topic");
    body["generate_in_background"] = json!(false);
    let response = h.server.post("/report").json(&body).await;
    response.assert_status_ok();

    let result: Value = response.json();
    assert_eq!(result["report"], "# Foreground\n\nDone.");
    assert_eq!(result["research_costs"], 0.25);
    let research_id = result["research_id"].as_str().unwrap().to_string();

    let download = h.server.get(&format!("/report/{}", research_id)).await;
    download.assert_status_ok();
    assert_eq!(download.text(), "# Foreground\n\nDone.");
    let content_type = download.header("content-type");
    assert!(content_type.to_str().unwrap().contains("markdown"));
    let disposition = download.header("content-disposition");
    assert!(
        disposition
            .to_str()
            .unwrap()
            .contains(&format!("{}.md", research_id))
    );
}

#[tokio::test]
async fn test_foreground_failure_is_server_error() {
    let h = harness(MockResearchEngine::failing());

    let mut body = request("doomed");
    body["generate_in_background"] = json!(false);
    let response = h.server.post("/report").json(&body).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("Mock research failure"));
}

#[tokio::test]
async fn test_background_failure_is_recorded() {
    let h = harness(MockResearchEngine::failing());

    let research_id = submit_queued(&h, &request("doomed")).await;
    h.state
        .orchestrator
        .wait_for_completion(&research_id)
        .await
        .unwrap();

    let body: Value = h.server.get(&format!("/jobs/{}", research_id)).await.json();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["kind"], "execution");
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let h = harness(MockResearchEngine::new("report"));

    let mut empty_task = request("   ");
    let response = h.server.post("/report").json(&empty_task).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    empty_task["task"] = json!("fine");
    empty_task["report_type"] = json!("poem");
    let response = h.server.post("/report").json(&empty_task).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let mut zero_depth = request("fine");
    zero_depth["deep_research_config"] = json!({"max_iterations": 0});
    let response = h.server.post("/report").json(&zero_depth).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert!(h.state.orchestrator.is_empty());
}

#[tokio::test]
async fn test_same_task_gets_distinct_ids() {
    let (engine, gate) = MockResearchEngine::gated("report");
    let h = harness(engine);

    let first = submit_queued(&h, &request("duplicate")).await;
    let second = submit_queued(&h, &request("duplicate")).await;
    assert_ne!(first, second);

    gate.add_permits(2);
    for id in [&first, &second] {
        h.state.orchestrator.wait_for_completion(id).await.unwrap();
    }
}

#[tokio::test]
async fn test_missing_report_is_message_not_error() {
    let h = harness(MockResearchEngine::new("report"));

    let response = h.server.get("/report/task_0_missing").await;
    response.assert_status_ok();
    response.assert_json(&json!({"message": "Report not found."}));
}

// ============= Jobs =============

#[tokio::test]
async fn test_list_jobs() {
    let h = harness(MockResearchEngine::new("report"));

    let first = submit_queued(&h, &request("first topic")).await;
    let second = submit_queued(&h, &request("second topic")).await;

    let jobs: Vec<Value> = h.server.get("/jobs").await.json();
    let ids: Vec<&str> = jobs
        .iter()
        .map(|job| job["research_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(MockResearchEngine::new("report"));

    let response = h.server.get("/jobs/task_0_nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].is_string());

    let response = h.server.post("/jobs/task_0_nope/cancel").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let (engine, _gate) = MockResearchEngine::gated("never");
    let h = harness(engine);

    let research_id = submit_queued(&h, &request("long running")).await;

    let response = h
        .server
        .post(&format!("/jobs/{}/cancel", research_id))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["outcome"], "requested");

    h.state
        .orchestrator
        .wait_for_completion(&research_id)
        .await
        .unwrap();
    let body: Value = h.server.get(&format!("/jobs/{}", research_id)).await.json();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["kind"], "cancelled");

    let again: Value = h
        .server
        .post(&format!("/jobs/{}/cancel", research_id))
        .await
        .json();
    assert_eq!(again["outcome"], "already_finished");
}

// ============= Documents =============

#[tokio::test]
async fn test_upload_list_delete_document() {
    let h = harness(MockResearchEngine::new("report"));

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"# Notes".to_vec())
            .file_name("notes.md")
            .mime_type("text/markdown"),
    );
    let response = h.server.post("/upload").multipart(form).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["filename"], "notes.md");

    let listing: Value = h.server.get("/files").await.json();
    assert_eq!(listing["files"], json!(["notes.md"]));

    let response = h.server.delete("/files/notes.md").await;
    response.assert_status_ok();
    response.assert_json(&json!({"message": "File deleted successfully"}));

    let listing: Value = h.server.get("/files").await.json();
    assert_eq!(listing["files"], json!([]));

    h.server
        .delete("/files/notes.md")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_into_knowledge_base() {
    let h = harness(MockResearchEngine::new("report"));

    let form = MultipartForm::new()
        .add_text("knowledge_base", "team")
        .add_part("file", Part::bytes(b"shared".to_vec()).file_name("shared.txt"));
    h.server
        .post("/upload")
        .multipart(form)
        .await
        .assert_status_ok();

    let kbs: Value = h.server.get("/knowledge-bases").await.json();
    assert_eq!(kbs["knowledge_bases"], json!(["team"]));

    let listing: Value = h
        .server
        .get("/files")
        .add_query_param("knowledge_base", "team")
        .await
        .json();
    assert_eq!(listing["files"], json!(["shared.txt"]));

    let global: Value = h.server.get("/files").await.json();
    assert_eq!(global["files"], json!([]));

    h.server
        .delete("/files/shared.txt")
        .add_query_param("knowledge_base", "team")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_upload_without_file_part_is_rejected() {
    let h = harness(MockResearchEngine::new("report"));

    let form = MultipartForm::new().add_text("knowledge_base", "team");
    h.server
        .post("/upload")
        .multipart(form)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_knowledge_base_job_reads_kb_documents() {
    let h = harness(MockResearchEngine::new("report"));

    let mut body = request("kb topic");
    body["knowledge_base"] = json!("../escape");
    h.server
        .post("/report")
        .json(&body)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    body["knowledge_base"] = json!("team");
    let research_id = submit_queued(&h, &body).await;
    let lookup = h
        .state
        .orchestrator
        .wait_for_completion(&research_id)
        .await
        .unwrap();
    assert!(matches!(lookup, JobLookup::Completed(_)));
}
