//! Normalized result of an upload call.

use deforum_core::text::tail;
use serde::Serialize;

/// Characters of a failed response body kept per attempt.
pub const BODY_TAIL_CHARS: usize = 400;

/// Error recorded for a transport skipped because the run ran out of time.
pub const DEADLINE_EXPIRED: &str = "run deadline expired before attempt";

/// Why an upload did not produce a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailureReason {
    FileMissing,
    MissingEnv,
    AllAttemptsFailed,
    Skipped,
}

/// Diagnostics for one failed transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    /// Transport name, e.g. `"direct_put"`.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last [`BODY_TAIL_CHARS`] characters of the response body.
    pub body: String,
}

impl AttemptFailure {
    /// The endpoint answered with a non-2xx status.
    pub fn status(method: &str, status: u16, body: &str) -> Self {
        Self {
            method: method.to_string(),
            status: Some(status),
            error: None,
            body: tail(body, BODY_TAIL_CHARS).to_string(),
        }
    }

    /// The request never got a response.
    pub fn error(method: &str, error: impl ToString) -> Self {
        Self {
            method: method.to_string(),
            status: None,
            error: Some(error.to_string()),
            body: String::new(),
        }
    }

    /// The run's deadline passed before this transport could be tried.
    pub fn deadline_expired(method: &str) -> Self {
        Self::error(method, DEADLINE_EXPIRED)
    }

    pub fn is_deadline_expired(&self) -> bool {
        self.error.as_deref() == Some(DEADLINE_EXPIRED)
    }
}

/// What an upload produced. `url` is set exactly when `ok` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UploadFailureReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl UploadOutcome {
    pub fn success(
        url: String,
        key: &str,
        transport: &str,
        attempts: Vec<AttemptFailure>,
    ) -> Self {
        Self {
            ok: true,
            url: Some(url),
            key: Some(key.to_string()),
            transport: Some(transport.to_string()),
            reason: None,
            attempts,
            hints: Vec::new(),
        }
    }

    pub fn failure(
        reason: UploadFailureReason,
        key: Option<&str>,
        attempts: Vec<AttemptFailure>,
    ) -> Self {
        let hints = hints_for(reason, &attempts);
        Self {
            ok: false,
            url: None,
            key: key.map(str::to_string),
            transport: None,
            reason: Some(reason),
            attempts,
            hints,
        }
    }

    /// Upload not requested, or nothing to upload.
    pub fn skipped() -> Self {
        Self::failure(UploadFailureReason::Skipped, None, Vec::new())
    }
}

/// Remediation hints derived from what went wrong.
fn hints_for(reason: UploadFailureReason, attempts: &[AttemptFailure]) -> Vec<String> {
    match reason {
        UploadFailureReason::Skipped | UploadFailureReason::FileMissing => Vec::new(),
        UploadFailureReason::MissingEnv => vec![
            "set VERCEL_BLOB_BASE and VERCEL_BLOB_READ_WRITE_TOKEN, or BLOB_PROXY_URL".to_string(),
        ],
        UploadFailureReason::AllAttemptsFailed => {
            let statuses: Vec<u16> = attempts.iter().filter_map(|a| a.status).collect();
            let mut hints = Vec::new();
            if statuses.iter().any(|s| matches!(s, 401 | 403)) {
                hints.push("use a read-write storage credential, not a read-only one".to_string());
            }
            if statuses.iter().any(|s| matches!(s, 404 | 405)) {
                hints.push("verify the storage base URL".to_string());
            }
            if statuses.iter().any(|s| matches!(s, 400 | 422)) {
                hints.push("avoid special characters in the path key".to_string());
            }
            if statuses.contains(&413) {
                hints.push(
                    "file exceeds the endpoint size limit; configure BLOB_PROXY_URL".to_string(),
                );
            }
            if attempts.iter().any(AttemptFailure::is_deadline_expired) {
                hints.push(
                    "raise timeout_ms or DEFORUM_JOB_TIMEOUT to leave time for upload".to_string(),
                );
            }
            if attempts
                .iter()
                .any(|a| a.status.is_none() && !a.is_deadline_expired())
            {
                hints.push("check network access to the storage endpoint".to_string());
            }
            if hints.is_empty() {
                hints.push("verify the storage base URL".to_string());
                hints.push("use a read-write storage credential, not a read-only one".to_string());
            }
            hints
        }
    }
}
