//! Fallback-chain uploader.
//!
//! [`BlobUploader::upload`] checks its preconditions up front, then tries
//! each transport in order until one succeeds. Every failure is kept in the
//! outcome, so a caller can see exactly which encodings were rejected.
//!
//! Each attempt gets `min(configured timeout, time left on the run)`. Once
//! the run's deadline has passed, the remaining transports are not tried.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use deforum_core::Deadline;

use crate::config::{BlobConfig, DEFAULT_TIMEOUT};
use crate::outcome::{AttemptFailure, UploadFailureReason, UploadOutcome};
use crate::transport::{
    DirectTransport, HttpSettings, LegacyMultipartTransport, ProxyTransport, UploadPayload,
    UploadTransport,
};

/// Ordered list of transports.
pub struct BlobUploader {
    transports: Vec<Box<dyn UploadTransport>>,
    attempt_timeout: Duration,
}

impl BlobUploader {
    /// Build the transport chain for whatever `config` enables:
    /// proxy, direct (both key encodings), then legacy multipart.
    pub fn from_config(config: &BlobConfig) -> Self {
        if !config.has_transport() {
            tracing::info!(
                target: "deforum.upload",
                "No blob storage configured, uploads will report missing_env",
            );
        }
        let http = HttpSettings {
            client: reqwest::Client::new(),
            token: config.token.clone(),
            public_base: config.public_base.clone(),
        };

        let mut transports: Vec<Box<dyn UploadTransport>> = Vec::new();
        if let Some(url) = &config.proxy_url {
            transports.push(Box::new(ProxyTransport::new(url.clone(), http.clone())));
        }
        if let (Some(base), true) = (&config.base_url, config.direct_enabled()) {
            transports.push(Box::new(DirectTransport::new(base.clone(), false, http.clone())));
            transports.push(Box::new(DirectTransport::new(base.clone(), true, http.clone())));
        }
        if let Some(url) = &config.legacy_url {
            transports.push(Box::new(LegacyMultipartTransport::new(url.clone(), http)));
        }
        Self::with_transports(transports).with_attempt_timeout(config.timeout)
    }

    pub fn with_transports(transports: Vec<Box<dyn UploadTransport>>) -> Self {
        Self {
            transports,
            attempt_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upper bound on a single attempt.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Transport names in attempt order.
    pub fn methods(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.method()).collect()
    }

    /// Upload `local` under `key`, finishing by `deadline`.
    pub async fn upload(&self, local: &Path, key: &str, deadline: Deadline) -> UploadOutcome {
        if !local.is_file() {
            tracing::warn!(
                target: "deforum.upload",
                path = %local.display(),
                "Upload source missing",
            );
            return UploadOutcome::failure(UploadFailureReason::FileMissing, Some(key), Vec::new());
        }
        if self.transports.is_empty() {
            tracing::warn!(target: "deforum.upload", "No upload transport configured");
            return UploadOutcome::failure(UploadFailureReason::MissingEnv, Some(key), Vec::new());
        }

        let bytes = match tokio::fs::read(local).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!(target: "deforum.upload", error = %e, "Upload source unreadable");
                return UploadOutcome::failure(
                    UploadFailureReason::FileMissing,
                    Some(key),
                    Vec::new(),
                );
            }
        };
        let payload = UploadPayload {
            key: key.to_string(),
            file_name: local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content_type: mime_guess::from_path(local)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            bytes,
        };

        let mut attempts: Vec<AttemptFailure> = Vec::new();
        for transport in &self.transports {
            if deadline.is_expired() {
                tracing::warn!(
                    target: "deforum.upload",
                    key,
                    method = transport.method(),
                    "Run deadline expired, not trying remaining transports",
                );
                attempts.push(AttemptFailure::deadline_expired(transport.method()));
                break;
            }
            let timeout = deadline.remaining_capped(self.attempt_timeout);
            match transport.attempt(&payload, timeout).await {
                Ok(url) => {
                    tracing::info!(
                        target: "deforum.upload",
                        key,
                        method = transport.method(),
                        failed_attempts = attempts.len(),
                        "Upload succeeded",
                    );
                    return UploadOutcome::success(url, key, transport.method(), attempts);
                }
                Err(failure) => {
                    tracing::warn!(
                        target: "deforum.upload",
                        key,
                        method = %failure.method,
                        status = ?failure.status,
                        error = ?failure.error,
                        "Upload attempt failed",
                    );
                    attempts.push(failure);
                }
            }
        }

        tracing::error!(
            target: "deforum.upload",
            key,
            attempts = attempts.len(),
            "All upload attempts failed",
        );
        UploadOutcome::failure(UploadFailureReason::AllAttemptsFailed, Some(key), attempts)
    }
}
