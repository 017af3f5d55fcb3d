//! Periodic liveness signal while a job runs.
//!
//! [`Heartbeat::start`] spawns a ticking task; [`Heartbeat::stop`] cancels
//! it and waits for it to finish, so no beat is emitted after `stop`
//! returns. Dropping a running heartbeat cancels it as well.

use std::sync::Arc;
use std::time::Duration;

use deforum_events::{EventSink, JobEvent};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lower bound on the tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running heartbeat task.
pub struct Heartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl Heartbeat {
    /// Spawn the ticking task. The first beat fires one `interval` from now.
    pub fn start(run_id: impl Into<String>, interval: Duration, sink: Arc<dyn EventSink>) -> Self {
        let run_id = run_id.into();
        let interval = interval.max(MIN_INTERVAL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval_at(started + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut beats = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        beats += 1;
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        tracing::debug!(
                            target: "deforum.heartbeat",
                            run_id = %run_id,
                            beat = beats,
                            elapsed_ms,
                            "Job still running",
                        );
                        sink.record(&JobEvent::Heartbeat {
                            run_id: run_id.clone(),
                            beat: beats,
                            elapsed_ms,
                        });
                    }
                }
            }
            beats
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it. Returns the number of beats sent.
    pub async fn stop(mut self) -> u64 {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(beats) => beats,
            Err(e) => {
                tracing::warn!(target: "deforum.heartbeat", error = %e, "Heartbeat task failed");
                0
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
