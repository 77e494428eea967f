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

use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use ossfuzz_jobs::backend::remote::RemoteBackend;
use ossfuzz_jobs::config::PollBackoff;
use ossfuzz_jobs::external::credentials::{CredentialsProvider, StaticCredentials};
use ossfuzz_jobs::external::storage::HttpStorage;
use ossfuzz_jobs::{
    BackendKind, BackendPreference, DiagnosticKind, JobManager, JobSpec, JobStatus,
    OrchestratorError, WaitTimeout,
};

const TOKEN: &str = "secret-token";

fn manager(server: &Server) -> JobManager {
    let credentials: Arc<dyn CredentialsProvider> =
        Arc::new(StaticCredentials::new(Some(TOKEN.to_string())));
    let storage = Arc::new(HttpStorage::new(Duration::from_secs(5), Some(credentials.clone())).unwrap());
    let remote = RemoteBackend::new(server.url(), Duration::from_secs(5), credentials.clone(), storage)
        .unwrap()
        .with_retry_delay(Duration::from_millis(1));
    JobManager::new(credentials)
        .with_remote(Arc::new(remote))
        .with_backoff(PollBackoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            multiplier: 2,
        })
}

fn curl_spec() -> JobSpec {
    JobSpec::new("curl", "curl_fuzzer", Duration::from_secs(60)).unwrap()
}

async fn mock_submit(server: &mut Server, remote_id: &str) -> mockito::Mock {
    server
        .mock("POST", "/v1/jobs")
        .match_header("authorization", format!("Bearer {}", TOKEN).as_str())
        .match_body(Matcher::PartialJson(json!({
            "project": "curl",
            "fuzz_target": "curl_fuzzer",
            "duration_secs": 60,
            "engine": "libfuzzer",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "job_id": remote_id }).to_string())
        .create_async()
        .await
}

async fn mock_state(server: &mut Server, remote_id: &str, state: &str) -> mockito::Mock {
    server
        .mock("GET", format!("/v1/jobs/{}", remote_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "state": state }).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn test_remote_job_lifecycle_with_inline_result() {
    let mut server = Server::new_async().await;
    let submit = mock_submit(&mut server, "r-42").await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    submit.assert_async().await;

    let queued = mock_state(&mut server, "r-42", "queued").await;
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Pending);
    queued.remove_async().await;

    let done = mock_state(&mut server, "r-42", "succeeded").await;
    // Seen RUNNING before the terminal status is reported.
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Running);
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Completed);
    done.remove_async().await;

    let _result = server
        .mock("GET", "/v1/jobs/r-42/result")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "state": "succeeded",
                "result": {
                    "executions": 123456,
                    "elapsed_secs": 60.0,
                    "crashes": [
                        {"testcase_ref": "gs://crashes/1", "crash_type": "Heap-buffer-overflow", "dedup_hash": "h1"},
                        {"testcase_ref": "gs://crashes/2", "crash_type": "Heap-buffer-overflow", "dedup_hash": "h1"},
                        {"testcase_ref": "gs://crashes/3", "crash_type": "Null-dereference", "crash_state": "parse"}
                    ]
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let result = manager.get_results(&handle).await.unwrap();
    assert_eq!(result.job_id, handle.id());
    assert_eq!(result.backend, BackendKind::Remote);
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.executions, Some(123456));
    assert_eq!(result.elapsed, Some(Duration::from_secs(60)));
    assert_eq!(result.output_dir, None);
    assert_eq!(result.crashes.len(), 2);
    assert_eq!(result.crashes[0].input, "gs://crashes/1");
    assert_eq!(result.crashes[1].input, "gs://crashes/3");
    assert_eq!(result.crashes[1].dedup_hash.len(), 64);
}

#[tokio::test]
async fn test_result_loaded_from_storage_reference() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-7").await;
    let _state = mock_state(&mut server, "r-7", "done").await;
    let manager = manager(&server);

    let reference = format!("{}/bucket/r-7.json", server.url());
    let _result = server
        .mock("GET", "/v1/jobs/r-7/result")
        .with_status(200)
        .with_body(json!({ "state": "done", "result_ref": reference }).to_string())
        .create_async()
        .await;
    let payload = server
        .mock("GET", "/bucket/r-7.json")
        .match_header("authorization", format!("Bearer {}", TOKEN).as_str())
        .with_status(200)
        .with_body(json!({ "executions": 10 }).to_string())
        .create_async()
        .await;

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    let result = manager
        .wait_for_completion(&handle, WaitTimeout::After(Duration::from_secs(5)))
        .await
        .unwrap();
    payload.assert_async().await;
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.diagnostic, None);
    assert_eq!(result.executions, Some(10));
    assert_eq!(result.elapsed, None);
    assert_eq!(result.storage_ref.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn test_unknown_remote_state_fails_with_diagnostic() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-9").await;
    let _state = mock_state(&mut server, "r-9", "hibernating").await;
    let _result = server
        .mock("GET", "/v1/jobs/r-9/result")
        .with_status(200)
        .with_body(json!({ "result": {} }).to_string())
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    let result = manager
        .wait_for_completion(&handle, WaitTimeout::After(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    let diagnostic = result.diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::UnknownRemoteState);
    assert!(diagnostic.message.contains("'hibernating'"), "{}", diagnostic.message);
}

#[tokio::test]
async fn test_result_without_state_uses_last_polled_state() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-4").await;
    let _state = mock_state(&mut server, "r-4", "succeeded").await;
    let _result = server
        .mock("GET", "/v1/jobs/r-4/result")
        .with_status(200)
        .with_body(json!({ "result": { "executions": 5 } }).to_string())
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    let result = manager
        .wait_for_completion(&handle, WaitTimeout::After(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.executions, Some(5));
    assert_eq!(result.diagnostic, None);
}

#[tokio::test]
async fn test_remote_failure_carries_service_error() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-3").await;
    let _state = mock_state(&mut server, "r-3", "failed").await;
    let _result = server
        .mock("GET", "/v1/jobs/r-3/result")
        .with_status(200)
        .with_body(json!({ "state": "failed", "result": { "error": "build step failed" } }).to_string())
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    let result = manager
        .wait_for_completion(&handle, WaitTimeout::After(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    let diagnostic = result.diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::RemoteFailure);
    assert_eq!(diagnostic.message, "build step failed");
}

#[tokio::test]
async fn test_cancel_remote_job() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-5").await;
    let _state = mock_state(&mut server, "r-5", "running").await;
    let cancel = server
        .mock("POST", "/v1/jobs/r-5/cancel")
        .with_status(200)
        .with_body(json!({ "cancelled": true }).to_string())
        .expect(1)
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Running);
    assert!(manager.cancel_job(&handle).await.unwrap());
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Cancelled);
    // Terminal: no second request reaches the service.
    assert!(!manager.cancel_job(&handle).await.unwrap());
    cancel.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_job_results_while_service_winds_down() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-2").await;
    let _state = mock_state(&mut server, "r-2", "running").await;
    let _cancel = server
        .mock("POST", "/v1/jobs/r-2/cancel")
        .with_status(200)
        .with_body(json!({ "cancelled": true }).to_string())
        .create_async()
        .await;
    let _result = server
        .mock("GET", "/v1/jobs/r-2/result")
        .with_status(200)
        .with_body(json!({ "state": "running", "result": { "executions": 42 } }).to_string())
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Running);
    assert!(manager.cancel_job(&handle).await.unwrap());
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Cancelled);

    let result = manager.get_results(&handle).await.unwrap();
    assert_eq!(result.status, JobStatus::Cancelled);
    assert_eq!(result.executions, Some(42));
    assert_eq!(result.diagnostic.unwrap().kind, DiagnosticKind::Cancelled);
}

#[tokio::test]
async fn test_cancel_conflict_means_already_terminal() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-6").await;
    let _cancel = server
        .mock("POST", "/v1/jobs/r-6/cancel")
        .with_status(409)
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    assert!(!manager.cancel_job(&handle).await.unwrap());
    assert_eq!(manager.tracked_jobs().await[0].1, JobStatus::Pending);
}

#[tokio::test]
async fn test_submit_failure_is_not_retried() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/v1/jobs")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let manager = manager(&server);

    let err = manager.submit_job(curl_spec()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::BackendUnavailable { .. }));
    assert!(manager.tracked_jobs().await.is_empty());
    submit.assert_async().await;
}

#[tokio::test]
async fn test_result_fetch_gives_up_after_bounded_retries() {
    let mut server = Server::new_async().await;
    let _submit = mock_submit(&mut server, "r-8").await;
    let _state = mock_state(&mut server, "r-8", "completed").await;
    let result = server
        .mock("GET", "/v1/jobs/r-8/result")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;
    let manager = manager(&server);

    let handle = manager.submit_job(curl_spec()).await.unwrap();
    let err = manager
        .wait_for_completion(&handle, WaitTimeout::After(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ResultsUnavailable(_)));
    result.assert_async().await;
    // The job itself finished; only its output is missing.
    assert_eq!(manager.poll_status(&handle).await.unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn test_remote_requested_without_credentials() {
    let server = Server::new_async().await;
    let credentials: Arc<dyn CredentialsProvider> = Arc::new(StaticCredentials::none());
    let storage = Arc::new(HttpStorage::new(Duration::from_secs(5), None).unwrap());
    let remote =
        RemoteBackend::new(server.url(), Duration::from_secs(5), credentials.clone(), storage).unwrap();
    let manager = JobManager::new(credentials).with_remote(Arc::new(remote));

    let spec = curl_spec().with_backend(BackendPreference::Remote);
    let err = manager.submit_job(spec).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));
}
