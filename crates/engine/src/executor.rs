//! Job execution under a deadline.
//!
//! A [`JobExecutor`] is one way of running the engine (a local process or
//! an HTTP call). [`BoundedExecutor`] wraps whichever strategy is
//! configured with a heartbeat and outcome logging. Each job gets exactly
//! one attempt.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deforum_core::text::tail;
use deforum_core::{Deadline, JobSpec};
use deforum_events::EventSink;
use serde::Serialize;

use crate::heartbeat::Heartbeat;

/// Status of a successful run.
pub const STATUS_OK: i32 = 0;

/// Status of a run that hit its deadline.
pub const STATUS_TIMEOUT: i32 = 504;

/// Status of a run that failed to start or lost its transport.
pub const STATUS_EXCEPTION: i32 = 500;

/// Characters of engine output kept for diagnostics.
pub const TAIL_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// `0` on success, the exit code or HTTP status on failure, `504` on
    /// timeout, `500` on a process or network exception.
    pub status: i32,
    /// Last [`TAIL_CHARS`] characters of engine output.
    pub tail: String,
    /// Directory the engine was told to write to.
    pub outdir: PathBuf,
}

impl ExecutionResult {
    pub fn new(status: i32, output: &str, outdir: impl Into<PathBuf>) -> Self {
        Self {
            status,
            tail: tail(output, TAIL_CHARS).to_string(),
            outdir: outdir.into(),
        }
    }

    /// Deadline expired; `[TIMEOUT]` is appended to the captured output.
    pub fn timeout(output: &str, outdir: impl Into<PathBuf>) -> Self {
        Self::new(STATUS_TIMEOUT, &format!("{output}\n[TIMEOUT]"), outdir)
    }

    /// The run could not be started or was lost; the error is appended.
    pub fn exception(output: &str, error: impl fmt::Display, outdir: impl Into<PathBuf>) -> Self {
        Self::new(STATUS_EXCEPTION, &format!("{output}\n[EXC] {error}"), outdir)
    }

    pub fn succeeded(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn timed_out(&self) -> bool {
        self.status == STATUS_TIMEOUT
    }
}

// ---------------------------------------------------------------------------
// JobExecutor
// ---------------------------------------------------------------------------

/// One strategy for running the engine.
///
/// Implementations never return early with an error: every failure is
/// classified into an [`ExecutionResult`] status.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Short mode name reported in run results (`"cli-launch"`, `"api"`).
    fn name(&self) -> &'static str;

    /// Run `job`, finishing before `deadline`.
    async fn execute(&self, job: &JobSpec, deadline: Deadline) -> ExecutionResult;
}

// ---------------------------------------------------------------------------
// BoundedExecutor
// ---------------------------------------------------------------------------

/// Runs a strategy with a heartbeat alongside it.
pub struct BoundedExecutor {
    strategy: Box<dyn JobExecutor>,
    heartbeat_interval: Duration,
    sink: Arc<dyn EventSink>,
}

impl BoundedExecutor {
    pub fn new(
        strategy: Box<dyn JobExecutor>,
        heartbeat_interval: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            strategy,
            heartbeat_interval,
            sink,
        }
    }

    /// Mode name of the wrapped strategy.
    pub fn mode(&self) -> &'static str {
        self.strategy.name()
    }

    /// Run `job` once. The heartbeat is stopped and joined before this
    /// returns, whatever the outcome.
    pub async fn execute(
        &self,
        run_id: &str,
        job: &JobSpec,
        deadline: Deadline,
    ) -> ExecutionResult {
        tracing::info!(
            target: "deforum.exec",
            run_id,
            mode = self.mode(),
            budget_ms = deadline.remaining().as_millis() as u64,
            "Starting engine run",
        );

        let heartbeat = Heartbeat::start(run_id, self.heartbeat_interval, Arc::clone(&self.sink));
        let result = self.strategy.execute(job, deadline).await;
        let beats = heartbeat.stop().await;

        if result.succeeded() {
            tracing::info!(target: "deforum.exec", run_id, beats, "Engine run succeeded");
        } else if result.timed_out() {
            tracing::warn!(target: "deforum.exec", run_id, beats, "Engine run timed out");
        } else {
            tracing::warn!(
                target: "deforum.exec",
                run_id,
                beats,
                status = result.status,
                "Engine run failed",
            );
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
