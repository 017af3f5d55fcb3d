//! Upload transports.
//!
//! Each transport is one way of getting bytes into storage. The uploader
//! tries them in order; adding or removing a transport is a list edit.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::outcome::AttemptFailure;

/// What every transport sends.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    /// Destination key, e.g. `runs/ab12cd34/clip.mp4`.
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// One upload strategy.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Name recorded in diagnostics and in the outcome.
    fn method(&self) -> &'static str;

    /// Try once, giving up after `timeout`. Returns the public URL on success.
    async fn attempt(
        &self,
        payload: &UploadPayload,
        timeout: Duration,
    ) -> Result<String, AttemptFailure>;
}

/// Settings shared by every HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub client: reqwest::Client,
    pub token: Option<String>,
    pub public_base: Option<String>,
}

impl HttpSettings {
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let request = request.timeout(timeout);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a response into the URL result or a diagnostic.
    async fn finish(
        &self,
        method: &str,
        sent: Result<reqwest::Response, reqwest::Error>,
        key: &str,
        request_url: &str,
    ) -> Result<String, AttemptFailure> {
        let response = sent.map_err(|e| AttemptFailure::error(method, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        if !status.is_success() {
            return Err(AttemptFailure::status(method, status.as_u16(), &body));
        }
        Ok(resolve_url(&body, self.public_base.as_deref(), key, request_url))
    }
}

/// URL of the stored object, from the best source available: a JSON `url`
/// field, a bare URL body, the public base plus key, or the request URL.
pub fn resolve_url(
    body: &str,
    public_base: Option<&str>,
    key: &str,
    request_url: &str,
) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(url) = value
            .get("url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
        {
            return url.to_string();
        }
    }
    let text = body.trim();
    if text.starts_with("http://") || text.starts_with("https://") {
        return text.to_string();
    }
    if let Some(base) = public_base {
        return format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'));
    }
    request_url.to_string()
}

fn with_pathname(url: &str, key: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}pathname={}", urlencoding::encode(key))
}

// ---------------------------------------------------------------------------
// ProxyTransport
// ---------------------------------------------------------------------------

/// `POST <proxy>?pathname=<key>` with the raw bytes.
pub struct ProxyTransport {
    url: String,
    http: HttpSettings,
}

impl ProxyTransport {
    pub fn new(url: impl Into<String>, http: HttpSettings) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl UploadTransport for ProxyTransport {
    fn method(&self) -> &'static str {
        "proxy_post"
    }

    async fn attempt(
        &self,
        payload: &UploadPayload,
        timeout: Duration,
    ) -> Result<String, AttemptFailure> {
        let url = with_pathname(&self.url, &payload.key);
        let request = self
            .http
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, &payload.content_type)
            .body(payload.bytes.clone());
        let sent = self.http.authorize(request, timeout).send().await;
        self.http.finish(self.method(), sent, &payload.key, &url).await
    }
}

// ---------------------------------------------------------------------------
// DirectTransport
// ---------------------------------------------------------------------------

/// `PUT <base>/?pathname=<urlencoded key>` with the raw bytes.
///
/// Storage backends disagree on whether the pathname carries a leading
/// `/`, so this transport is configured once for each encoding.
pub struct DirectTransport {
    base_url: String,
    leading_slash: bool,
    http: HttpSettings,
}

impl DirectTransport {
    pub fn new(base_url: impl Into<String>, leading_slash: bool, http: HttpSettings) -> Self {
        Self {
            base_url: base_url.into(),
            leading_slash,
            http,
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        let pathname = if self.leading_slash {
            format!("/{key}")
        } else {
            key.to_string()
        };
        format!(
            "{}/?pathname={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&pathname)
        )
    }
}

#[async_trait]
impl UploadTransport for DirectTransport {
    fn method(&self) -> &'static str {
        if self.leading_slash {
            "direct_put_slash"
        } else {
            "direct_put"
        }
    }

    async fn attempt(
        &self,
        payload: &UploadPayload,
        timeout: Duration,
    ) -> Result<String, AttemptFailure> {
        let url = self.url_for(&payload.key);
        let request = self
            .http
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, &payload.content_type)
            .body(payload.bytes.clone());
        let sent = self.http.authorize(request, timeout).send().await;
        self.http.finish(self.method(), sent, &payload.key, &url).await
    }
}

// ---------------------------------------------------------------------------
// LegacyMultipartTransport
// ---------------------------------------------------------------------------

/// `POST` a multipart form with a `file` part and a `pathname` field.
pub struct LegacyMultipartTransport {
    url: String,
    http: HttpSettings,
}

impl LegacyMultipartTransport {
    pub fn new(url: impl Into<String>, http: HttpSettings) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl UploadTransport for LegacyMultipartTransport {
    fn method(&self) -> &'static str {
        "legacy_multipart"
    }

    async fn attempt(
        &self,
        payload: &UploadPayload,
        timeout: Duration,
    ) -> Result<String, AttemptFailure> {
        let part = reqwest::multipart::Part::bytes(payload.bytes.to_vec())
            .file_name(payload.file_name.clone())
            .mime_str(&payload.content_type)
            .map_err(|e| AttemptFailure::error(self.method(), e))?;
        let form = reqwest::multipart::Form::new()
            .text("pathname", payload.key.clone())
            .part("file", part);

        let request = self.http.client.post(&self.url).multipart(form);
        let sent = self.http.authorize(request, timeout).send().await;
        self.http
            .finish(self.method(), sent, &payload.key, &self.url)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
