//! Run lifecycle records.
//!
//! Every run emits exactly one [`JobEvent::Start`] and one
//! [`JobEvent::End`], with [`JobEvent::Timing`] and
//! [`JobEvent::Heartbeat`] records in between.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A structured lifecycle record for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// The run was accepted. `input_keys` lists the top-level request keys.
    Start {
        run_id: String,
        input_keys: Vec<String>,
    },

    /// The run finished, successfully or not.
    End {
        run_id: String,
        ok: bool,
        artifact_found: bool,
    },

    /// A phase completed in `elapsed_ms`.
    Timing {
        run_id: String,
        phase: String,
        elapsed_ms: u64,
    },

    /// Periodic liveness signal while the engine runs.
    Heartbeat {
        run_id: String,
        beat: u64,
        elapsed_ms: u64,
    },
}

impl JobEvent {
    /// Short name matching the serialized `event` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::End { .. } => "end",
            Self::Timing { .. } => "timing",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::Start { run_id, .. }
            | Self::End { run_id, .. }
            | Self::Timing { run_id, .. }
            | Self::Heartbeat { run_id, .. } => run_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventRecord
// ---------------------------------------------------------------------------

/// A [`JobEvent`] stamped with the time it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: JobEvent,

    /// When the event was recorded (UTC).
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn now(event: JobEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = JobEvent::End {
            run_id: "abcd1234".into(),
            ok: true,
            artifact_found: true,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "end");
        assert_eq!(value["run_id"], "abcd1234");
        assert_eq!(value["artifact_found"], true);
        assert_eq!(event.kind(), "end");
    }

    #[test]
    fn record_flattens_event_fields() {
        let record = EventRecord::now(JobEvent::Heartbeat {
            run_id: "r1".into(),
            beat: 3,
            elapsed_ms: 45_000,
        });
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["event"], "heartbeat");
        assert_eq!(value["beat"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn run_id_is_shared_across_variants() {
        let start = JobEvent::Start {
            run_id: "r2".into(),
            input_keys: vec!["prompt".into()],
        };
        assert_eq!(start.run_id(), "r2");
        assert_eq!(start.kind(), "start");
    }
}
