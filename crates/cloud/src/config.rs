//! Blob storage endpoints and credentials.

use std::time::Duration;

/// Per-request upload timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Where uploads may go. Every endpoint is optional; the uploader only
/// builds transports for the ones that are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConfig {
    /// Storage API base URL for direct uploads.
    pub base_url: Option<String>,
    /// Bearer token sent with every transport when set.
    pub token: Option<String>,
    /// Same-origin proxy that forwards bytes to storage.
    pub proxy_url: Option<String>,
    /// Public URL prefix used when a response carries no URL.
    pub public_base: Option<String>,
    /// Multipart upload endpoint of older deployments.
    pub legacy_url: Option<String>,
    pub timeout: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            proxy_url: None,
            public_base: None,
            legacy_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BlobConfig {
    /// Direct uploads need both the base URL and a credential.
    pub fn direct_enabled(&self) -> bool {
        self.base_url.is_some() && self.token.is_some()
    }

    /// `true` if at least one transport can be attempted.
    pub fn has_transport(&self) -> bool {
        self.proxy_url.is_some() || self.direct_enabled() || self.legacy_url.is_some()
    }
}
