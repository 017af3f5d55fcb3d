//! HTTP surface for running jobs from a long-lived process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::{AppError, AppResult};
use crate::handler::{Orchestrator, RunResponse};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Engine strategy in use.
    pub mode: &'static str,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.orchestrator.mode(),
    })
}

/// POST /run -- run one job synchronously and return its report.
///
/// The run is detached from the request future, so a request that times out
/// still lets the run reach its end event.
async fn run_job(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<RunResponse>> {
    let Json(event) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let response = tokio::spawn(async move { orchestrator.handle(&event).await })
        .await
        .map_err(|e| AppError::InternalError(format!("run task failed: {e}")))??;
    Ok(Json(response))
}

/// Build the router with the standard middleware stack.
///
/// `request_timeout` should exceed the job timeout; runs end on their own
/// deadline and the layer only guards against a wedged handler.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
