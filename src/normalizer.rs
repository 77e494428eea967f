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

//! Result Normalizer.
//!
//! Maps the structurally different raw outputs of the two backends onto one
//! `ExecutionResult`. Pure: no I/O, same input gives the same output.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;

use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{
    BackendKind, CrashReport, Diagnostic, DiagnosticKind, ExecutionResult, JobStatus,
};
use crate::core::raw::{map_remote_state, LocalRawOutput, RawOutput, RemoteRawOutput};

pub fn normalize(kind: BackendKind, raw: RawOutput) -> Result<ExecutionResult> {
    if raw.kind() != kind {
        return Err(OrchestratorError::ResultsUnavailable(format!(
            "{} backend produced {} output",
            kind,
            raw.kind()
        )));
    }
    match raw {
        RawOutput::Local(raw) => Ok(normalize_local(raw)),
        RawOutput::Remote(raw) => normalize_remote(raw),
    }
}

fn normalize_local(raw: LocalRawOutput) -> ExecutionResult {
    let crashes = raw.artifacts.into_iter().map(|artifact| {
        let kind = match (artifact.kind.as_str(), &raw.sanitizer_summary) {
            ("crash", Some(summary)) => summary.clone(),
            _ => artifact.kind,
        };
        CrashReport {
            input: artifact.path.display().to_string(),
            kind,
            dedup_hash: artifact.dedup_hash,
        }
    });

    ExecutionResult {
        job_id: raw.summary.job_id,
        backend: BackendKind::Local,
        status: raw.summary.status,
        executions: raw.summary.executions,
        elapsed: seconds(Some(raw.summary.elapsed_secs)),
        crashes: dedup(crashes),
        output_dir: Some(raw.output_dir),
        storage_ref: None,
        diagnostic: raw.summary.diagnostic,
    }
}

fn normalize_remote(raw: RemoteRawOutput) -> Result<ExecutionResult> {
    let mapped = map_remote_state(&raw.state);
    if let Some(status) = mapped {
        if !status.is_terminal() {
            return Err(OrchestratorError::ResultsUnavailable(format!(
                "remote job {} is still {}",
                raw.remote_id, status
            )));
        }
    }

    let report = raw.report;
    let status = mapped.unwrap_or(JobStatus::Failed);
    let diagnostic = match mapped {
        None => Some(Diagnostic::new(
            DiagnosticKind::UnknownRemoteState,
            format!("remote service reported unknown state '{}'", raw.state),
        )),
        Some(JobStatus::Failed) => Some(Diagnostic::new(
            DiagnosticKind::RemoteFailure,
            report
                .error
                .clone()
                .unwrap_or_else(|| "remote service reported failure".to_string()),
        )),
        Some(JobStatus::TimedOut) => Some(Diagnostic::new(
            DiagnosticKind::TimedOut,
            report
                .error
                .clone()
                .unwrap_or_else(|| "remote job exceeded its duration bound".to_string()),
        )),
        Some(JobStatus::Cancelled) => Some(Diagnostic::new(
            DiagnosticKind::Cancelled,
            "remote job was cancelled",
        )),
        Some(_) => None,
    };

    let crashes = report.crashes.into_iter().map(|crash| {
        let dedup_hash = crash
            .dedup_hash
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| signature_hash(&crash.crash_type, crash.crash_state.as_deref()));
        CrashReport {
            input: crash.testcase_ref,
            kind: crash.crash_type,
            dedup_hash,
        }
    });

    Ok(ExecutionResult {
        job_id: raw.job_id,
        backend: BackendKind::Remote,
        status,
        executions: report.executions,
        elapsed: seconds(report.elapsed_secs),
        crashes: dedup(crashes),
        output_dir: None,
        storage_ref: report.storage_ref,
        diagnostic,
    })
}

/// SHA-256 over the crash type and state, newline separated.
fn signature_hash(crash_type: &str, crash_state: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(crash_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(crash_state.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Drops crashes whose dedup hash was already seen, keeping first-seen order.
fn dedup(crashes: impl IntoIterator<Item = CrashReport>) -> Vec<CrashReport> {
    let mut seen = HashSet::new();
    crashes
        .into_iter()
        .filter(|crash| seen.insert(crash.dedup_hash.clone()))
        .collect()
}

fn seconds(secs: Option<f64>) -> Option<Duration> {
    secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
}
