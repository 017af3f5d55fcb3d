//! Network strategy: submit the job to an already-running engine.
//!
//! Engine builds expose the submission endpoint under different paths, so
//! candidates are tried in order and a `404` moves on to the next one.

use std::time::Duration;

use async_trait::async_trait;
use deforum_core::{Deadline, JobSpec};

use crate::api::EngineApi;
use crate::executor::{ExecutionResult, JobExecutor, STATUS_OK};

/// Submission paths used by known engine builds, in preference order.
pub const KNOWN_PATHS: &[&str] = &["/deforum_api/batches", "/deforum/run", "/deforum_api/run"];

/// Upper bound on the route-discovery request.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Submits each job over HTTP.
#[derive(Debug, Clone)]
pub struct ApiExecutor {
    api: EngineApi,
    configured_path: Option<String>,
}

impl ApiExecutor {
    /// `configured_path` skips discovery when the deployment knows the path.
    pub fn new(api: EngineApi, configured_path: Option<String>) -> Self {
        Self {
            api,
            configured_path: configured_path.filter(|p| !p.trim().is_empty()),
        }
    }

    /// Ordered, de-duplicated submission paths to try.
    pub async fn candidates(&self, deadline: Deadline) -> Vec<String> {
        let first = match &self.configured_path {
            Some(path) => Some(path.clone()),
            None => self.discover(deadline).await,
        };
        let mut paths: Vec<String> = Vec::new();
        for path in first.into_iter().chain(KNOWN_PATHS.iter().map(|p| p.to_string())) {
            let path = normalize_path(&path);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// Alphabetically first POST route mentioning `deforum` in the engine's
    /// OpenAPI document.
    async fn discover(&self, deadline: Deadline) -> Option<String> {
        match self.api.list_routes(deadline.remaining_capped(DISCOVERY_TIMEOUT)).await {
            Ok(routes) => routes
                .into_iter()
                .find(|r| r.path.contains("deforum") && r.accepts_post())
                .map(|r| r.path),
            Err(e) => {
                tracing::debug!(target: "deforum.exec", error = %e, "Route discovery failed");
                None
            }
        }
    }
}

#[async_trait]
impl JobExecutor for ApiExecutor {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn execute(&self, job: &JobSpec, deadline: Deadline) -> ExecutionResult {
        let outdir = job.outdir.clone();
        let mut log = String::new();

        for path in self.candidates(deadline).await {
            if deadline.is_expired() {
                return ExecutionResult::timeout(&log, outdir);
            }
            match self.api.submit_job(&path, job, deadline.remaining()).await {
                Ok(resp) if resp.status == 404 => {
                    tracing::debug!(
                        target: "deforum.exec",
                        path = %path,
                        "Submission path not found",
                    );
                    log.push_str(&format!("{path}: 404\n"));
                }
                Ok(resp) => {
                    tracing::info!(
                        target: "deforum.exec",
                        path = %path,
                        status = resp.status,
                        "Engine accepted request",
                    );
                    log.push_str(&format!("{path}: {}\n{}", resp.status, resp.body));
                    let status = if (200..300).contains(&resp.status) {
                        STATUS_OK
                    } else {
                        i32::from(resp.status)
                    };
                    return ExecutionResult::new(status, &log, outdir);
                }
                Err(e) if e.is_timeout() => return ExecutionResult::timeout(&log, outdir),
                Err(e) => return ExecutionResult::exception(&log, format!("{path}: {e}"), outdir),
            }
        }

        log.push_str("no submission endpoint found");
        ExecutionResult::new(404, &log, outdir)
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use deforum_core::{JobRequest, JobSpecBuilder};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::executor::{STATUS_EXCEPTION, STATUS_TIMEOUT};

    fn job() -> JobSpec {
        JobSpecBuilder::new("/tmp/deforum-api").build(&JobRequest::default())
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn configured_path_comes_first_and_duplicates_are_dropped() {
        let exec =
            ApiExecutor::new(EngineApi::new("http://127.0.0.1:1"), Some("deforum/run".into()));
        assert_eq!(
            exec.candidates(deadline()).await,
            vec!["/deforum/run", "/deforum_api/batches", "/deforum_api/run"]
        );
    }

    #[tokio::test]
    async fn discovered_route_is_preferred() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "paths": {
                    "/deforum_api/jobs": {"get": {}},
                    "/deforum_api/v2/batches": {"post": {}},
                }
            })))
            .mount(&server)
            .await;

        let exec = ApiExecutor::new(EngineApi::new(server.uri()), None);
        let candidates = exec.candidates(deadline()).await;
        assert_eq!(candidates[0], "/deforum_api/v2/batches");
        assert_eq!(candidates.len(), 4);
    }

    #[tokio::test]
    async fn discovery_picks_the_alphabetically_first_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"paths": {
                    "/deforum_api/z_run": {"post": {}},
                    "/deforum_api/a_run": {"post": {}}
                }}"#,
            ))
            .mount(&server)
            .await;

        let exec = ApiExecutor::new(EngineApi::new(server.uri()), None);
        let candidates = exec.candidates(deadline()).await;
        assert_eq!(candidates[0], "/deforum_api/a_run");
    }

    #[tokio::test]
    async fn not_found_falls_through_to_next_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deforum_api/batches"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/deforum/run"))
            .respond_with(ResponseTemplate::new(202).set_body_string("{\"job_ids\":[\"b1\"]}"))
            .expect(1)
            .mount(&server)
            .await;

        let exec = ApiExecutor::new(EngineApi::new(server.uri()), None);
        let result = exec.execute(&job(), deadline()).await;
        assert!(result.succeeded(), "tail: {}", result.tail);
        assert!(result.tail.contains("job_ids"));
    }

    #[tokio::test]
    async fn engine_error_status_is_reported_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deforum_api/batches"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad job"))
            .mount(&server)
            .await;

        let exec = ApiExecutor::new(EngineApi::new(server.uri()), None);
        let result = exec.execute(&job(), deadline()).await;
        assert_eq!(result.status, 422);
        assert!(result.tail.contains("bad job"));
    }

    #[tokio::test]
    async fn every_path_missing_reports_not_found() {
        let server = MockServer::start().await;
        let exec = ApiExecutor::new(EngineApi::new(server.uri()), None);
        let result = exec.execute(&job(), deadline()).await;
        assert_eq!(result.status, 404);
        assert!(result.tail.contains("no submission endpoint found"));
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let exec = ApiExecutor::new(
            EngineApi::new(server.uri()),
            Some("/deforum_api/batches".into()),
        );
        let result = exec
            .execute(&job(), Deadline::after(Duration::from_millis(300)))
            .await;
        assert_eq!(result.status, STATUS_TIMEOUT);
    }

    #[tokio::test]
    async fn unreachable_engine_is_an_exception() {
        let exec = ApiExecutor::new(
            EngineApi::new("http://127.0.0.1:1"),
            Some("/deforum_api/batches".into()),
        );
        let result = exec.execute(&job(), deadline()).await;
        assert_eq!(result.status, STATUS_EXCEPTION);
        assert!(result.tail.contains("[EXC]"));
    }
}
