//! REST client for the engine's HTTP API.
//!
//! Wraps the few endpoints the worker needs (route discovery, ControlNet
//! name lists, job submission) using [`reqwest`].

use std::time::Duration;

use deforum_core::controlnet::ControlNetCatalog;
use deforum_core::JobSpec;
use serde::Deserialize;

/// HTTP client for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineApi {
    client: reqwest::Client,
    base_url: String,
}

/// One route advertised by the engine's OpenAPI document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoute {
    pub path: String,
    /// Lowercase HTTP methods (`"get"`, `"post"`, ...).
    pub methods: Vec<String>,
}

impl ApiRoute {
    pub fn accepts_post(&self) -> bool {
        self.methods.iter().any(|m| m == "post")
    }
}

/// Raw response to a job submission. Any status is returned as-is.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub status: u16,
    pub body: String,
}

/// Errors from the engine REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Engine API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl EngineApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

#[derive(Debug, Deserialize)]
struct OpenApiDocument {
    /// Keyed by path. The map is sorted, so document order is not kept.
    #[serde(default)]
    paths: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    model_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModuleList {
    #[serde(default)]
    module_list: Vec<String>,
}

impl EngineApi {
    /// Create a new API client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://127.0.0.1:3001`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// List the routes in `GET /openapi.json`, sorted by path.
    pub async fn list_routes(&self, timeout: Duration) -> Result<Vec<ApiRoute>, EngineApiError> {
        let response = self
            .client
            .get(self.url("/openapi.json"))
            .timeout(timeout)
            .send()
            .await?;
        let doc: OpenApiDocument = Self::parse_response(response).await?;

        Ok(doc
            .paths
            .into_iter()
            .map(|(path, ops)| ApiRoute {
                path,
                methods: ops
                    .as_object()
                    .map(|o| o.keys().map(|m| m.to_ascii_lowercase()).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Fetch the ControlNet model and preprocessor names the engine knows.
    ///
    /// Sends `GET /controlnet/model_list` and `GET /controlnet/module_list`.
    pub async fn controlnet_catalog(
        &self,
        timeout: Duration,
    ) -> Result<ControlNetCatalog, EngineApiError> {
        let response = self
            .client
            .get(self.url("/controlnet/model_list"))
            .timeout(timeout)
            .send()
            .await?;
        let models: ModelList = Self::parse_response(response).await?;

        let response = self
            .client
            .get(self.url("/controlnet/module_list"))
            .timeout(timeout)
            .send()
            .await?;
        let modules: ModuleList = Self::parse_response(response).await?;

        Ok(ControlNetCatalog {
            models: models.model_list,
            modules: modules.module_list,
        })
    }

    /// `POST` the job JSON to `path`. Non-2xx statuses are not errors here;
    /// the caller decides what a 404 means.
    pub async fn submit_job(
        &self,
        path: &str,
        job: &JobSpec,
        timeout: Duration,
    ) -> Result<SubmitResponse, EngineApiError> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(timeout)
            .json(job)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(SubmitResponse { status, body })
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Return the response unchanged on success, or an
    /// [`EngineApiError::ApiError`] with the status and body.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, EngineApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
