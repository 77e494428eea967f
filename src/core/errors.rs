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

//! Domain error types.
//!
//! Only conditions that prevent the lifecycle API from answering are errors.
//! Fuzzing outcomes (build failures, crashing harnesses, failed remote jobs)
//! are terminal job statuses, not variants of this enum.

use std::time::Duration;
use thiserror::Error;

use crate::core::models::{JobId, JobStatus};

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// Main error type for the job lifecycle API
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bad or missing backend selection inputs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed job spec or unknown project/target
    #[error("Validation error: {0}")]
    Validation(String),

    /// Submission-time infrastructure failure, not a job outcome
    #[error("Backend unavailable ({backend}): {error}")]
    BackendUnavailable { backend: String, error: String },

    /// Handle not tracked by this manager
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    /// Results requested before a terminal state
    #[error("Job {job} has not finished (status: {status})")]
    JobNotFinished { job: JobId, status: JobStatus },

    /// Terminal but output unreadable or corrupt
    #[error("Results unavailable: {0}")]
    ResultsUnavailable(String),

    /// Caller's wait budget exceeded
    #[error("Timed out after {waited:?} waiting for job {job}")]
    WaitTimeout { job: JobId, waited: Duration },
}

impl OrchestratorError {
    pub fn backend_unavailable(backend: impl Into<String>, error: impl ToString) -> Self {
        OrchestratorError::BackendUnavailable {
            backend: backend.into(),
            error: error.to_string(),
        }
    }

    /// Process exit code used by the command line driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Configuration(_) => 78,
            OrchestratorError::Validation(_) => 65,
            OrchestratorError::BackendUnavailable { .. } => 69,
            OrchestratorError::UnknownJob(_) => 66,
            OrchestratorError::JobNotFinished { .. } => 75,
            OrchestratorError::ResultsUnavailable(_) => 74,
            OrchestratorError::WaitTimeout { .. } => 124,
        }
    }
}
