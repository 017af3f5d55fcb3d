//! Run lifecycle events for the Deforum worker.
//!
//! - [`JobEvent`]: start, end, per-phase timing and heartbeat records.
//! - [`EventSink`]: where records go. [`TracingSink`] writes them as
//!   structured `tracing` events; [`MemorySink`] keeps them for tests.
//! - [`PhaseTimer`]: measures each phase and emits its timing record.

pub mod record;
pub mod sink;
pub mod timing;

pub use record::{EventRecord, JobEvent};
pub use sink::{EventSink, MemorySink, TracingSink};
pub use timing::{Phase, PhaseTimer, PhaseTiming};
