//! Per-phase wall-clock timing.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::record::JobEvent;
use crate::sink::EventSink;

/// The four phases of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Build,
    Execute,
    Locate,
    Upload,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Execute => "execute",
            Self::Locate => "locate",
            Self::Upload => "upload",
        }
    }
}

/// One `{step, ms}` entry of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub step: String,
    pub ms: u64,
}

/// Times phases of one run and emits a [`JobEvent::Timing`] for each.
pub struct PhaseTimer {
    run_id: String,
    sink: Arc<dyn EventSink>,
    timings: Vec<PhaseTiming>,
}

impl PhaseTimer {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
            timings: Vec::new(),
        }
    }

    /// Await `fut`, recording how long it took under `phase`.
    pub async fn time<F: Future>(&mut self, phase: Phase, fut: F) -> F::Output {
        let started = Instant::now();
        let out = fut.await;
        self.record(phase, started.elapsed());
        out
    }

    /// Record a phase measured elsewhere.
    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.sink.record(&JobEvent::Timing {
            run_id: self.run_id.clone(),
            phase: phase.as_str().to_string(),
            elapsed_ms: ms,
        });
        self.timings.push(PhaseTiming {
            step: phase.as_str().to_string(),
            ms,
        });
    }

    pub fn timings(&self) -> &[PhaseTiming] {
        &self.timings
    }

    pub fn into_timings(self) -> Vec<PhaseTiming> {
        self.timings
    }
}
