//! Deforum job worker.
//!
//! Wires request coercion, engine execution, artifact discovery and upload
//! into one [`handler::Orchestrator`], exposed through a one-shot CLI
//! (`run`) and a small HTTP server (`serve`).

pub mod config;
pub mod error;
pub mod handler;
pub mod server;

pub use config::WorkerConfig;
pub use handler::{Orchestrator, RunResponse};
