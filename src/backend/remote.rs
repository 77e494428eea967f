// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP client for the remote fuzzing service.
//!
//! REST/JSON protocol rooted at the configured base URL:
//!
//! - `POST /v1/jobs` submits a job and returns `{job_id}`
//! - `GET /v1/jobs/{id}` returns `{state, message?}`
//! - `GET /v1/jobs/{id}/result` returns `{state, result?, result_ref?}`
//! - `POST /v1/jobs/{id}/cancel` returns `{cancelled}`, or 409 once terminal

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::ExecutionBackend;
use crate::core::constants::{engine, remote};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{BackendKind, JobId, JobSpec, JobStatus};
use crate::core::raw::{map_remote_state, RawOutput, RemoteRawOutput, RemoteRunReport};
use crate::external::credentials::CredentialsProvider;
use crate::external::storage::StorageFetcher;

const BACKEND_NAME: &str = "remote";

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    project: &'a str,
    fuzz_target: &'a str,
    duration_secs: u64,
    engine: &'a str,
    sanitizer: &'a str,
    architecture: &'a str,
    engine_args: &'a [String],
    env: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    result: Option<RemoteRunReport>,
    #[serde(default)]
    result_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    cancelled: bool,
}

/// Why a request did not produce a usable response.
#[derive(Debug)]
enum RequestFailure {
    /// Timeouts, connection failures, 5xx and 429. Worth retrying.
    Transient(String),
    Permanent(String),
}

impl RequestFailure {
    fn message(self) -> String {
        match self {
            RequestFailure::Transient(m) | RequestFailure::Permanent(m) => m,
        }
    }
}

/// Remote half of a job: the service-assigned id and the last state seen.
pub struct RemoteJob {
    id: JobId,
    remote_id: String,
    last_state: Mutex<Option<String>>,
}

impl RemoteJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }
}

pub struct RemoteBackend {
    http_client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialsProvider>,
    storage: Arc<dyn StorageFetcher>,
    retry_delay: Duration,
}

impl RemoteBackend {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialsProvider>,
        storage: Arc<dyn StorageFetcher>,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(remote::CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                OrchestratorError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            storage,
            retry_delay: Duration::from_millis(remote::RETRY_DELAY_MS),
        })
    }

    /// Overrides the base delay between retries of transient failures.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn jobs_url(&self) -> String {
        format!("{}{}", self.base_url, remote::JOBS_PATH)
    }

    fn job_url(&self, remote_id: &str) -> String {
        format!("{}/{}", self.jobs_url(), remote_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.remote_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> std::result::Result<reqwest::Response, RequestFailure> {
        let response = self.authorized(request).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                RequestFailure::Transient(format!("request to {} failed: {}", url, e))
            } else {
                RequestFailure::Permanent(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("{} returned HTTP {}: {}", url, status, body.trim());
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(RequestFailure::Transient(message))
        } else {
            Err(RequestFailure::Permanent(message))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, RequestFailure> {
        let response = self.send(self.http_client.get(url), url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RequestFailure::Permanent(format!("malformed response from {}: {}", url, e)))
    }

    /// GET with bounded retries of transient failures.
    async fn get_json_with_retry<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, String> {
        let mut attempt = 1;
        loop {
            match self.get_json(url).await {
                Ok(value) => return Ok(value),
                Err(RequestFailure::Transient(msg)) if attempt < remote::MAX_ATTEMPTS => {
                    warn!(url = %url, attempt, error = %msg, "Transient remote failure, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure.message()),
            }
        }
    }

    async fn load_report(&self, reference: &str) -> Result<RemoteRunReport> {
        let bytes = self.storage.fetch_bytes(reference).await?;
        let mut report: RemoteRunReport = serde_json::from_slice(&bytes).map_err(|e| {
            OrchestratorError::ResultsUnavailable(format!(
                "corrupt result payload at {}: {}",
                reference, e
            ))
        })?;
        if report.storage_ref.is_none() {
            report.storage_ref = Some(reference.to_string());
        }
        Ok(report)
    }
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    type Handle = RemoteJob;

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn submit(&self, job_id: JobId, spec: &JobSpec) -> Result<RemoteJob> {
        let options = spec.options();
        let body = SubmitRequest {
            project: spec.project(),
            fuzz_target: spec.fuzz_target(),
            duration_secs: spec.duration_secs(),
            engine: engine::ENGINE_NAME,
            sanitizer: &options.sanitizer,
            architecture: &options.architecture,
            engine_args: &options.extra_args,
            env: &options.env,
        };
        let url = self.jobs_url();
        debug!(job_id = %job_id, url = %url, "Submitting remote job");

        // No retry: a repeated POST could start the job twice.
        let response = self
            .send(self.http_client.post(&url).json(&body), &url)
            .await
            .map_err(|f| {
                let message = f.message();
                error!(job_id = %job_id, error = %message, "Remote submission failed");
                OrchestratorError::backend_unavailable(BACKEND_NAME, message)
            })?;
        let accepted: SubmitResponse = response.json().await.map_err(|e| {
            OrchestratorError::backend_unavailable(
                BACKEND_NAME,
                format!("malformed submission response: {}", e),
            )
        })?;
        if accepted.job_id.trim().is_empty() {
            return Err(OrchestratorError::backend_unavailable(
                BACKEND_NAME,
                "service returned an empty job id",
            ));
        }

        info!(
            job_id = %job_id,
            remote_id = %accepted.job_id,
            project = %spec.project(),
            target = %spec.fuzz_target(),
            "Remote job submitted"
        );
        Ok(RemoteJob {
            id: job_id,
            remote_id: accepted.job_id,
            last_state: Mutex::new(None),
        })
    }

    async fn poll(&self, job: &RemoteJob) -> Result<JobStatus> {
        let url = self.job_url(&job.remote_id);
        let response: StatusResponse = self
            .get_json_with_retry(&url)
            .await
            .map_err(|e| OrchestratorError::backend_unavailable(BACKEND_NAME, e))?;
        debug!(
            job_id = %job.id,
            remote_id = %job.remote_id,
            state = %response.state,
            message = ?response.message,
            "Remote job state"
        );

        let status = match map_remote_state(&response.state) {
            Some(status) => status,
            None => {
                warn!(
                    job_id = %job.id,
                    remote_id = %job.remote_id,
                    state = %response.state,
                    "Unknown remote job state, treating as failed"
                );
                JobStatus::Failed
            }
        };
        *job.last_state.lock().await = Some(response.state);
        Ok(status)
    }

    async fn fetch(&self, job: &RemoteJob) -> Result<RawOutput> {
        let url = format!("{}{}", self.job_url(&job.remote_id), remote::RESULT_SUFFIX);
        let response: ResultResponse = self
            .get_json_with_retry(&url)
            .await
            .map_err(OrchestratorError::ResultsUnavailable)?;

        let state = match response.state {
            Some(state) => state,
            None => job.last_state.lock().await.clone().unwrap_or_default(),
        };
        let report = match (response.result, response.result_ref) {
            (Some(report), _) => report,
            (None, Some(reference)) => self.load_report(&reference).await?,
            (None, None) => {
                return Err(OrchestratorError::ResultsUnavailable(format!(
                    "remote job {} returned neither a result nor a result reference",
                    job.remote_id
                )))
            }
        };

        Ok(RawOutput::Remote(RemoteRawOutput {
            job_id: job.id,
            remote_id: job.remote_id.clone(),
            state,
            report,
        }))
    }

    async fn cancel(&self, job: &RemoteJob) -> Result<bool> {
        let url = format!("{}{}", self.job_url(&job.remote_id), remote::CANCEL_SUFFIX);
        let response = self
            .authorized(self.http_client.post(&url))
            .send()
            .await
            .map_err(|e| OrchestratorError::backend_unavailable(BACKEND_NAME, e))?;

        match response.status() {
            StatusCode::CONFLICT => {
                debug!(job_id = %job.id, remote_id = %job.remote_id, "Remote job already terminal");
                Ok(false)
            }
            status if status.is_success() => {
                let body: CancelResponse = response.json().await.map_err(|e| {
                    OrchestratorError::backend_unavailable(
                        BACKEND_NAME,
                        format!("malformed cancel response: {}", e),
                    )
                })?;
                info!(job_id = %job.id, remote_id = %job.remote_id, cancelled = body.cancelled, "Remote cancel acknowledged");
                Ok(body.cancelled)
            }
            status => Err(OrchestratorError::backend_unavailable(
                BACKEND_NAME,
                format!("cancel returned HTTP {}", status),
            )),
        }
    }

    async fn release(&self, job: &RemoteJob) {
        // The last polled state stays: fetch falls back to it when the result
        // response omits the state.
        debug!(job_id = %job.id, remote_id = %job.remote_id, "Released remote job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::credentials::StaticCredentials;
    use crate::external::storage::HttpStorage;

    fn backend(url: &str) -> RemoteBackend {
        let credentials: Arc<dyn CredentialsProvider> =
            Arc::new(StaticCredentials::new(Some("token".to_string())));
        let storage = Arc::new(HttpStorage::new(Duration::from_secs(5), None).unwrap());
        RemoteBackend::new(url, Duration::from_secs(5), credentials, storage)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let backend = backend("http://fuzz.example.com/");
        assert_eq!(backend.jobs_url(), "http://fuzz.example.com/v1/jobs");
        assert_eq!(backend.job_url("r-1"), "http://fuzz.example.com/v1/jobs/r-1");
    }

    #[test]
    fn test_submit_body_shape() {
        let env = BTreeMap::from([("ASAN_OPTIONS".to_string(), "detect_leaks=0".to_string())]);
        let args = vec!["-dict=x".to_string()];
        let body = SubmitRequest {
            project: "curl",
            fuzz_target: "curl_fuzzer",
            duration_secs: 60,
            engine: "libfuzzer",
            sanitizer: "address",
            architecture: "x86_64",
            engine_args: &args,
            env: &env,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["duration_secs"], 60);
        assert_eq!(json["engine_args"][0], "-dict=x");
        assert_eq!(json["env"]["ASAN_OPTIONS"], "detect_leaks=0");
    }

    #[tokio::test]
    async fn test_poll_retries_transient_errors() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/v1/jobs/r-1")
            .with_status(503)
            .expect(remote::MAX_ATTEMPTS as usize)
            .create_async()
            .await;
        let backend = backend(&server.url());
        let job = RemoteJob {
            id: JobId::new(),
            remote_id: "r-1".to_string(),
            last_state: Mutex::new(None),
        };

        let err = backend.poll(&job).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BackendUnavailable { .. }));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_poll_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/v1/jobs/r-2")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let backend = backend(&server.url());
        let job = RemoteJob {
            id: JobId::new(),
            remote_id: "r-2".to_string(),
            last_state: Mutex::new(None),
        };

        assert!(backend.poll(&job).await.is_err());
        missing.assert_async().await;
    }
}
