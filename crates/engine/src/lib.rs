//! Engine integration for the Deforum worker.
//!
//! Provides the engine HTTP API wrapper, the two execution strategies
//! (a launched subprocess or a submission to a running server), the
//! heartbeat task, and the bounded executor that ties them together.

pub mod api;
pub mod executor;
pub mod heartbeat;
pub mod http;
pub mod subprocess;

pub use api::{EngineApi, EngineApiError};
pub use executor::{BoundedExecutor, ExecutionResult, JobExecutor};
pub use http::ApiExecutor;
pub use subprocess::{CliConfig, CliExecutor};
