//! Blob storage upload for rendered artifacts.
//!
//! [`BlobUploader`] pushes a local file through an ordered chain of
//! [`UploadTransport`]s and reports every failed attempt in an
//! [`UploadOutcome`].

pub mod config;
pub mod key;
pub mod outcome;
pub mod transport;
pub mod uploader;

pub use config::BlobConfig;
pub use key::storage_key;
pub use outcome::{AttemptFailure, UploadFailureReason, UploadOutcome};
pub use transport::{UploadPayload, UploadTransport};
pub use uploader::BlobUploader;
