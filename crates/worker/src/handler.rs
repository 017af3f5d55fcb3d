//! Run orchestration.
//!
//! [`Orchestrator::handle`] takes one inbound event through the four phases
//! (build, execute, locate, upload) under a single deadline and folds the
//! results into a [`RunResponse`]. Every run emits exactly one start and one
//! end event, whatever happens in between.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use deforum_cloud::{storage_key, BlobUploader, UploadOutcome};
use deforum_core::artifact::{find_latest, Artifact};
use deforum_core::controlnet::ControlNetCatalog;
use deforum_core::{CoreError, Deadline, JobRequest, JobSpec, JobSpecBuilder};
use deforum_engine::{
    ApiExecutor, BoundedExecutor, CliExecutor, EngineApi, ExecutionResult, JobExecutor,
};
use deforum_events::{EventSink, JobEvent, Phase, PhaseTimer, PhaseTiming, TracingSink};
use serde::Serialize;
use serde_json::Value;

use crate::config::{EngineMode, EnvVisibility, WorkerConfig};

/// Upper bound on the ControlNet catalog lookup.
const CATALOG_TIMEOUT: Duration = Duration::from_secs(3);

/// Filesystems with coarse mtimes can stamp a fresh render slightly before
/// the run started.
const FRESHNESS_SLACK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Why a run did not produce an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExecutionTimeout,
    ExecutionFailure,
    ArtifactNotFound,
}

/// Diagnostic report for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Execution succeeded and an artifact was found. Upload never affects it.
    pub ok: bool,
    pub mode: &'static str,
    pub run_id: String,
    pub local_outdir: PathBuf,
    pub picked_file: Option<PathBuf>,
    pub uploaded: UploadOutcome,
    pub env_seen: EnvVisibility,
    pub timings: Vec<PhaseTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Tail of engine output, only when execution did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_tail: Option<String>,
    /// The job as sent to the engine, when the request asked for `debug`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub status: RunStatus,
    pub result: RunReport,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: WorkerConfig,
    executor: BoundedExecutor,
    uploader: BlobUploader,
    sink: Arc<dyn EventSink>,
    engine_api: Option<EngineApi>,
}

impl Orchestrator {
    /// Production wiring: the strategy picked by `config.mode`, the
    /// configured upload chain, and a [`TracingSink`].
    pub fn new(config: WorkerConfig) -> Self {
        let api = config.engine_api();
        let strategy: Box<dyn JobExecutor> = match config.mode {
            EngineMode::Cli => Box::new(CliExecutor::new(config.cli_config())),
            EngineMode::Api => Box::new(ApiExecutor::new(api.clone(), config.api_path.clone())),
        };
        let uploader = BlobUploader::from_config(&config.blob);
        Self::with_parts(config, strategy, uploader, Arc::new(TracingSink), Some(api))
    }

    /// Assemble from explicit parts. `engine_api` is only used for the
    /// ControlNet catalog lookup; `None` skips it.
    pub fn with_parts(
        config: WorkerConfig,
        strategy: Box<dyn JobExecutor>,
        uploader: BlobUploader,
        sink: Arc<dyn EventSink>,
        engine_api: Option<EngineApi>,
    ) -> Self {
        let executor = BoundedExecutor::new(strategy, config.heartbeat_interval, Arc::clone(&sink));
        Self {
            config,
            executor,
            uploader,
            sink,
            engine_api,
        }
    }

    pub fn mode(&self) -> &'static str {
        self.executor.mode()
    }

    /// Run one job described by `event`.
    ///
    /// Only request validation fails the call; every later problem is
    /// reported inside the returned [`RunResponse`].
    pub async fn handle(&self, event: &Value) -> Result<RunResponse, CoreError> {
        let run_id = new_run_id();
        let input = event.get("input").cloned().unwrap_or(Value::Null);
        let input_keys = match &input {
            Value::Object(obj) => obj.keys().cloned().collect(),
            _ => Vec::new(),
        };

        self.sink.record(&JobEvent::Start {
            run_id: run_id.clone(),
            input_keys,
        });
        let started = Instant::now();
        let started_at = SystemTime::now();
        let mut timer = PhaseTimer::new(run_id.clone(), Arc::clone(&self.sink));

        // --- Build ---
        let build_started = Instant::now();
        let request = match JobRequest::from_value(&input) {
            Ok(request) => request,
            Err(e) => {
                timer.record(Phase::Build, build_started.elapsed());
                tracing::warn!(run_id = %run_id, error = %e, "Rejected run input");
                self.sink.record(&JobEvent::End {
                    run_id,
                    ok: false,
                    artifact_found: false,
                });
                return Err(e);
            }
        };
        // A request may shorten the configured job timeout, never extend it.
        let budget = request
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .map_or(self.config.job_timeout, |asked| asked.min(self.config.job_timeout));
        let deadline = Deadline::at(started + budget);

        let catalog = if request.controlnet_enabled() {
            self.fetch_catalog(deadline).await
        } else {
            None
        };
        let job = JobSpecBuilder::new(&self.config.outdir)
            .with_overrides(self.config.controlnet.clone())
            .with_catalog(catalog)
            .build(&request);
        timer.record(Phase::Build, build_started.elapsed());

        tracing::info!(
            run_id = %run_id,
            max_frames = job.max_frames,
            fps = job.fps,
            controlnet = job.controlnet_enabled(),
            budget_ms = budget.as_millis() as u64,
            "Built job",
        );

        // --- Execute ---
        let execution = timer
            .time(Phase::Execute, self.executor.execute(&run_id, &job, deadline))
            .await;

        // --- Locate ---
        let roots = self.config.search_dirs.clone();
        let floor = if self.config.fresh_only {
            started_at.checked_sub(FRESHNESS_SLACK)
        } else {
            None
        };
        let artifact = timer.time(Phase::Locate, locate(roots, floor)).await;

        // --- Upload ---
        let uploaded = timer
            .time(
                Phase::Upload,
                self.upload(&run_id, request.upload, artifact.as_ref(), deadline),
            )
            .await;

        let ok = execution.succeeded() && artifact.is_some();
        self.sink.record(&JobEvent::End {
            run_id: run_id.clone(),
            ok,
            artifact_found: artifact.is_some(),
        });
        tracing::info!(
            run_id = %run_id,
            ok,
            status = execution.status,
            uploaded = uploaded.ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished",
        );

        let report = RunReport {
            ok,
            mode: self.mode(),
            failure: classify(&execution, artifact.is_some()),
            launch_tail: (!execution.succeeded()).then(|| execution.tail.clone()),
            local_outdir: execution.outdir,
            picked_file: artifact.map(|a| a.path),
            uploaded,
            env_seen: self.config.env_seen(),
            timings: timer.into_timings(),
            job: request.debug.then_some(job),
            run_id,
        };
        Ok(RunResponse {
            status: if ok {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            result: report,
        })
    }

    async fn fetch_catalog(&self, deadline: Deadline) -> Option<ControlNetCatalog> {
        let api = self.engine_api.as_ref()?;
        match api
            .controlnet_catalog(deadline.remaining_capped(CATALOG_TIMEOUT))
            .await
        {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "ControlNet catalog unavailable, using configured names",
                );
                None
            }
        }
    }

    async fn upload(
        &self,
        run_id: &str,
        requested: bool,
        artifact: Option<&Artifact>,
        deadline: Deadline,
    ) -> UploadOutcome {
        match artifact {
            Some(artifact) if requested => {
                let key = storage_key(run_id, &artifact.file_name());
                self.uploader.upload(&artifact.path, &key, deadline).await
            }
            _ => UploadOutcome::skipped(),
        }
    }
}

/// Scan `roots` on the blocking pool.
async fn locate(roots: Vec<PathBuf>, floor: Option<SystemTime>) -> Option<Artifact> {
    match tokio::task::spawn_blocking(move || find_latest(&roots, floor)).await {
        Ok(found) => found,
        Err(e) => {
            tracing::error!(error = %e, "Artifact scan task failed");
            None
        }
    }
}

fn classify(execution: &ExecutionResult, artifact_found: bool) -> Option<FailureKind> {
    if execution.timed_out() {
        Some(FailureKind::ExecutionTimeout)
    } else if !execution.succeeded() {
        Some(FailureKind::ExecutionFailure)
    } else if !artifact_found {
        Some(FailureKind::ArtifactNotFound)
    } else {
        None
    }
}

/// First 8 hex characters of a v4 UUID.
fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use deforum_engine::executor::{STATUS_EXCEPTION, STATUS_TIMEOUT};

    use super::*;

    #[test]
    fn run_ids_are_short_hex() {
        let id = new_run_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_run_id());
    }

    #[test]
    fn failure_classification() {
        let out = Path::new("/tmp/out");
        assert_eq!(classify(&ExecutionResult::new(0, "", out), true), None);
        assert_eq!(
            classify(&ExecutionResult::new(0, "", out), false),
            Some(FailureKind::ArtifactNotFound)
        );
        assert_eq!(
            classify(&ExecutionResult::new(STATUS_TIMEOUT, "", out), true),
            Some(FailureKind::ExecutionTimeout)
        );
        assert_eq!(
            classify(&ExecutionResult::new(STATUS_EXCEPTION, "", out), false),
            Some(FailureKind::ExecutionFailure)
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RunStatus::Completed).unwrap(), "completed");
        assert_eq!(
            serde_json::to_value(FailureKind::ArtifactNotFound).unwrap(),
            "artifact_not_found"
        );
    }
}
