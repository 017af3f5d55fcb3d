//! Deforum worker domain logic.
//!
//! Pure, I/O-light building blocks shared by the engine, cloud and worker
//! crates:
//!
//! - [`schedule`]: the `frame:(value)` grammar and input normalization.
//! - [`request`]: coercion of the free-form inbound mapping.
//! - [`job`] and [`controlnet`]: the engine-ready job and its builder.
//! - [`deadline`]: the single time budget shared by every phase.
//! - [`artifact`]: newest-output discovery on disk.
//! - [`text`]: bounded output tails.

pub mod artifact;
pub mod controlnet;
pub mod deadline;
pub mod error;
pub mod job;
pub mod request;
pub mod schedule;
pub mod text;

pub use deadline::Deadline;
pub use error::CoreError;
pub use job::{JobSpec, JobSpecBuilder};
pub use request::JobRequest;
pub use schedule::Schedule;
