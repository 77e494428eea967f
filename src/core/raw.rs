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

//! Backend-specific raw output, as handed to the result normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::models::{BackendKind, Diagnostic, JobId, JobStatus};

/// Machine-readable record written as `summary.json` at the end of a local run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: JobId,
    pub project: String,
    pub fuzz_target: String,
    #[serde(rename = "outcome")]
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub executions: Option<u64>,
    pub elapsed_secs: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub diagnostic: Option<Diagnostic>,
}

/// A reproducer written by libFuzzer under the job's `crashes/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashArtifact {
    pub path: PathBuf,
    /// Artifact prefix: crash, leak, timeout, oom or slow-unit.
    pub kind: String,
    pub dedup_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRawOutput {
    pub output_dir: PathBuf,
    pub summary: RunSummary,
    pub artifacts: Vec<CrashArtifact>,
    /// Bug type from the sanitizer `SUMMARY:` line of the fuzz log.
    pub sanitizer_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCrash {
    pub testcase_ref: String,
    pub crash_type: String,
    #[serde(default)]
    pub crash_state: Option<String>,
    #[serde(default)]
    pub dedup_hash: Option<String>,
}

/// Result payload of a remote job, inline or loaded from a storage reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRunReport {
    #[serde(default)]
    pub executions: Option<u64>,
    #[serde(default)]
    pub elapsed_secs: Option<f64>,
    #[serde(default)]
    pub crashes: Vec<RemoteCrash>,
    #[serde(default)]
    pub storage_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRawOutput {
    pub job_id: JobId,
    pub remote_id: String,
    /// Service vocabulary state as reported with the result.
    pub state: String,
    pub report: RemoteRunReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawOutput {
    Local(LocalRawOutput),
    Remote(RemoteRawOutput),
}

impl RawOutput {
    pub fn kind(&self) -> BackendKind {
        match self {
            RawOutput::Local(_) => BackendKind::Local,
            RawOutput::Remote(_) => BackendKind::Remote,
        }
    }

    /// Reconciles a remote state that is missing or still reads as live with
    /// the terminal status recorded for the job, e.g. a service winding down
    /// a cancelled job. Other outputs are returned unchanged.
    pub fn settled(self, recorded: JobStatus) -> Self {
        match self {
            RawOutput::Remote(mut raw)
                if recorded.is_terminal()
                    && (raw.state.trim().is_empty()
                        || map_remote_state(&raw.state).is_some_and(|s| !s.is_terminal())) =>
            {
                raw.state = recorded.as_str().to_string();
                RawOutput::Remote(raw)
            }
            other => other,
        }
    }
}

/// Translates the remote service vocabulary. `None` for unknown states.
pub fn map_remote_state(state: &str) -> Option<JobStatus> {
    match state.trim().to_lowercase().as_str() {
        "queued" | "pending" | "scheduled" => Some(JobStatus::Pending),
        "started" | "running" | "in_progress" => Some(JobStatus::Running),
        "succeeded" | "success" | "completed" | "done" => Some(JobStatus::Completed),
        "failed" | "error" | "errored" => Some(JobStatus::Failed),
        "timed_out" | "timeout" => Some(JobStatus::TimedOut),
        "cancelled" | "canceled" | "aborted" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_remote_state_vocabulary() {
        assert_eq!(map_remote_state("QUEUED"), Some(JobStatus::Pending));
        assert_eq!(map_remote_state("in_progress"), Some(JobStatus::Running));
        assert_eq!(map_remote_state("succeeded"), Some(JobStatus::Completed));
        assert_eq!(map_remote_state("errored"), Some(JobStatus::Failed));
        assert_eq!(map_remote_state("timeout"), Some(JobStatus::TimedOut));
        assert_eq!(map_remote_state("canceled"), Some(JobStatus::Cancelled));
        assert_eq!(map_remote_state("paused"), None);
    }

    #[test]
    fn test_remote_report_defaults_missing_fields() {
        let report: RemoteRunReport = serde_json::from_str("{}").unwrap();
        assert_eq!(report.executions, None);
        assert!(report.crashes.is_empty());
        assert_eq!(report.storage_ref, None);
    }

    fn remote(state: &str) -> RawOutput {
        RawOutput::Remote(RemoteRawOutput {
            job_id: JobId::new(),
            remote_id: "r-1".to_string(),
            state: state.to_string(),
            report: RemoteRunReport::default(),
        })
    }

    fn state_of(raw: RawOutput) -> String {
        match raw {
            RawOutput::Remote(raw) => raw.state,
            RawOutput::Local(_) => panic!("expected remote output"),
        }
    }

    #[test]
    fn test_settled_replaces_live_state_only() {
        assert_eq!(state_of(remote("running").settled(JobStatus::Cancelled)), "cancelled");
        assert_eq!(state_of(remote("queued").settled(JobStatus::TimedOut)), "timed_out");
        assert_eq!(state_of(remote("").settled(JobStatus::Completed)), "completed");
        // Terminal and unknown states are kept for the normalizer.
        assert_eq!(state_of(remote("succeeded").settled(JobStatus::Cancelled)), "succeeded");
        assert_eq!(state_of(remote("paused").settled(JobStatus::Cancelled)), "paused");
        // Nothing to reconcile against before a terminal status.
        assert_eq!(state_of(remote("running").settled(JobStatus::Running)), "running");
    }
}
