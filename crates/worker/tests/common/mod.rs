#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use deforum_cloud::BlobUploader;
use deforum_core::{Deadline, JobSpec};
use deforum_engine::executor::STATUS_TIMEOUT;
use deforum_engine::{EngineApi, ExecutionResult, JobExecutor};
use deforum_events::{EventSink, MemorySink};
use deforum_worker::server::{build_router, AppState};
use deforum_worker::{Orchestrator, WorkerConfig};

/// What the fake engine saw on its last run.
#[derive(Debug, Clone)]
pub struct Seen {
    pub job: JobSpec,
    pub remaining: Duration,
}

/// Engine stand-in: optionally writes a video into the job's outdir, then
/// reports a fixed status.
pub struct FakeEngine {
    pub status: i32,
    pub output: &'static str,
    pub write_video: bool,
    /// How long a run takes before it reports.
    pub delay: Duration,
    pub seen: Arc<Mutex<Option<Seen>>>,
}

impl FakeEngine {
    pub fn rendering() -> Self {
        Self {
            status: 0,
            output: "Deforum rendered 8 frames",
            write_video: true,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(status: i32, output: &'static str) -> Self {
        Self {
            status,
            output,
            write_video: false,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobExecutor for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn execute(&self, job: &JobSpec, deadline: Deadline) -> ExecutionResult {
        *self.seen.lock().unwrap() = Some(Seen {
            job: job.clone(),
            remaining: deadline.remaining(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.write_video {
            std::fs::create_dir_all(&job.outdir).unwrap();
            std::fs::write(job.outdir.join("clip.mp4"), b"fake frames").unwrap();
        }
        if self.status == STATUS_TIMEOUT {
            return ExecutionResult::timeout(self.output, &job.outdir);
        }
        ExecutionResult::new(self.status, self.output, &job.outdir)
    }
}

/// Config rooted at `dir`, with `extra` variables layered on top.
pub fn test_config(dir: &Path, extra: &[(&str, &str)]) -> WorkerConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("DEFORUM_OUTDIR".into(), dir.join("out").display().to_string());
    vars.insert("DEFORUM_SEARCH_DIRS".into(), dir.display().to_string());
    vars.insert("A1111_ROOT".into(), dir.join("engine").display().to_string());
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    WorkerConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}

pub fn orchestrator(
    config: WorkerConfig,
    engine: FakeEngine,
    sink: Arc<MemorySink>,
    engine_api: Option<EngineApi>,
) -> Orchestrator {
    let uploader = BlobUploader::from_config(&config.blob);
    let sink: Arc<dyn EventSink> = sink;
    Orchestrator::with_parts(config, Box::new(engine), uploader, sink, engine_api)
}

/// Build the application router the way `serve` does.
pub fn build_test_app(orchestrator: Orchestrator) -> Router {
    build_test_app_with_timeout(orchestrator, Duration::from_secs(30))
}

pub fn build_test_app_with_timeout(orchestrator: Orchestrator, timeout: Duration) -> Router {
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
    };
    build_router(state, timeout)
}

pub async fn get(app: Router, uri: &str) -> Response<axum::body::Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &Value) -> Response<axum::body::Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_raw(app: Router, uri: &str, body: &str) -> Response<axum::body::Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<axum::body::Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
