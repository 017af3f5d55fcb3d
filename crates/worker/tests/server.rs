//! Integration tests for the HTTP surface.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use serde_json::json;

use common::{
    body_json, build_test_app, build_test_app_with_timeout, get, orchestrator, post_json,
    post_raw, test_config, FakeEngine,
};
use deforum_events::MemorySink;

fn app(dir: &tempfile::TempDir) -> axum::Router {
    let orch = orchestrator(
        test_config(dir.path(), &[]),
        FakeEngine::rendering(),
        Arc::new(MemorySink::new()),
        None,
    );
    build_test_app(orch)
}

// ---------------------------------------------------------------------------
// Test: GET /health reports version and mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let dir = tempfile::tempdir().unwrap();
    let response = get(app(&dir), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["mode"], "fake");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let response = get(app(&dir), "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: POST /run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_returns_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let response = post_json(app(&dir), "/run", &json!({"input": {"prompt": "a fox"}})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["result"]["ok"], true);
    assert!(json["result"]["picked_file"].is_string());
}

#[tokio::test]
async fn run_with_invalid_input_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let response = post_json(app(&dir), "/run", &json!({"input": {"steps": "many"}})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["error"].as_str().unwrap().contains("steps"));
}

#[tokio::test]
async fn run_without_input_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let response = post_json(app(&dir), "/run", &json!({})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"]["ok"], true);
}

#[tokio::test]
async fn malformed_body_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let response = post_raw(app(&dir), "/run", "{\"input\": ").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Test: a request timeout does not cut the run short
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_request_still_finishes_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(dir.path(), &[]),
        FakeEngine::rendering().with_delay(Duration::from_millis(800)),
        Arc::clone(&sink),
        None,
    );
    let app = build_test_app_with_timeout(orch, Duration::from_millis(300));

    let body = json!({"input": {"prompt": "a fox", "timeout_ms": 5000}});
    let response = post_json(app, "/run", &body).await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let waited = Instant::now();
    while sink.of_kind("end").is_empty() && waited.elapsed() < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(sink.of_kind("start").len(), 1);
    assert_eq!(sink.of_kind("end").len(), 1);
}
