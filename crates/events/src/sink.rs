//! Destinations for [`JobEvent`]s.
//!
//! [`EventSink`] is the seam between the orchestrator and wherever run
//! records end up. Production uses [`TracingSink`]; tests use
//! [`MemorySink`] to assert on the exact sequence of records.

use std::sync::Mutex;

use crate::record::{EventRecord, JobEvent};

/// Target used for every record emitted by [`TracingSink`].
pub const EVENT_TARGET: &str = "deforum.events";

/// Receives run lifecycle records. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &JobEvent);
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Emits each record as a single `tracing` event carrying its JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &JobEvent) {
        let record = EventRecord::now(event.clone());
        match serde_json::to_string(&record) {
            Ok(json) => tracing::info!(
                target: EVENT_TARGET,
                kind = event.kind(),
                run_id = event.run_id(),
                record = %json,
                "Job event"
            ),
            Err(e) => tracing::warn!(
                target: EVENT_TARGET,
                error = %e,
                kind = event.kind(),
                "Failed to serialize job event"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<JobEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<JobEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records of the given kind (`"start"`, `"heartbeat"`, ...).
    pub fn of_kind(&self, kind: &str) -> Vec<JobEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &JobEvent) {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(&JobEvent::Start {
            run_id: "r".into(),
            input_keys: vec![],
        });
        sink.record(&JobEvent::End {
            run_id: "r".into(),
            ok: false,
            artifact_found: false,
        });
        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["start", "end"]);
        assert_eq!(sink.of_kind("end").len(), 1);
    }

    #[test]
    fn sinks_are_object_safe() {
        let sinks: Vec<Arc<dyn EventSink>> =
            vec![Arc::new(TracingSink), Arc::new(MemorySink::new())];
        for sink in &sinks {
            sink.record(&JobEvent::Heartbeat {
                run_id: "r".into(),
                beat: 1,
                elapsed_ms: 10,
            });
        }
    }
}
