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

//! Job lifecycle data model.
//!
//! `JobSpec` is validated on construction and never mutated after
//! submission. `ExecutionResult` is the one canonical output shape shared by
//! both execution backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use crate::core::constants::{engine, limits};
use crate::core::errors::{OrchestratorError, Result};

static NAME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OrchestratorError::Validation(format!("invalid job id '{}': {}", s, e)))
    }
}

/// Opaque caller-held reference to a submitted job.
///
/// Handles are single use: every submission mints a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: JobId,
}

impl JobHandle {
    pub(crate) fn new(id: JobId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> JobId {
        self.id
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

impl From<JobId> for JobHandle {
    fn from(id: JobId) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

/// Caller's backend request. `Auto` defers to credential availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    #[default]
    Auto,
    Local,
    Remote,
}

impl FromStr for BackendPreference {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(BackendPreference::Auto),
            "local" => Ok(BackendPreference::Local),
            "remote" => Ok(BackendPreference::Remote),
            other => Err(OrchestratorError::Configuration(format!(
                "unknown backend '{}', expected auto, local or remote",
                other
            ))),
        }
    }
}

/// Engine settings forwarded to the build and run steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    pub sanitizer: String,
    pub architecture: String,
    pub corpus_dir: Option<PathBuf>,
    pub max_memory_mb: Option<u64>,
    pub env: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sanitizer: engine::DEFAULT_SANITIZER.to_string(),
            architecture: engine::DEFAULT_ARCHITECTURE.to_string(),
            corpus_dir: None,
            max_memory_mb: None,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    project: String,
    fuzz_target: String,
    duration: Duration,
    backend: BackendPreference,
    options: EngineOptions,
}

impl JobSpec {
    pub fn new(
        project: impl Into<String>,
        fuzz_target: impl Into<String>,
        duration: Duration,
    ) -> Result<Self> {
        let spec = Self {
            project: project.into().trim().to_string(),
            fuzz_target: fuzz_target.into().trim().to_string(),
            duration,
            backend: BackendPreference::Auto,
            options: EngineOptions::default(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Result<Self> {
        self.options = options;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        validate_name("project name", &self.project)?;
        validate_name("fuzz target", &self.fuzz_target)?;
        if self.duration.is_zero() {
            return Err(OrchestratorError::Validation(
                "duration bound must be greater than zero".to_string(),
            ));
        }
        if self.options.max_memory_mb == Some(0) {
            return Err(OrchestratorError::Validation(
                "max memory must be greater than zero".to_string(),
            ));
        }
        validate_name("sanitizer", &self.options.sanitizer)?;
        validate_name("architecture", &self.options.architecture)?;
        Ok(())
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn fuzz_target(&self) -> &str {
        &self.fuzz_target
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Duration bound in whole seconds, rounded up, never below one.
    pub fn duration_secs(&self) -> u64 {
        let secs = self
            .duration
            .as_secs()
            .saturating_add(u64::from(self.duration.subsec_nanos() > 0));
        secs.max(1)
    }

    pub fn backend(&self) -> BackendPreference {
        self.backend
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

fn validate_name(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "{} cannot be empty",
            what
        )));
    }
    if value.len() > limits::MAX_NAME_LENGTH {
        return Err(OrchestratorError::Validation(format!(
            "{} exceeds {} characters",
            what,
            limits::MAX_NAME_LENGTH
        )));
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(OrchestratorError::Validation(format!(
            "{} '{}' may only contain letters, digits, underscores and hyphens",
            what, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    BuildFailure,
    SetupFailure,
    HarnessCrash,
    NonZeroExit,
    RemoteFailure,
    UnknownRemoteState,
    Cancelled,
    TimedOut,
}

/// Explains a non-successful terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrashReport {
    /// Path of the reproducer (local) or testcase reference (remote).
    pub input: String,
    /// Sanitizer bug type, deadly signal, or libFuzzer artifact kind.
    pub kind: String,
    pub dedup_hash: String,
}

/// Canonical job output, produced only at a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: JobId,
    pub backend: BackendKind,
    pub status: JobStatus,
    pub executions: Option<u64>,
    pub elapsed: Option<Duration>,
    pub crashes: Vec<CrashReport>,
    pub output_dir: Option<PathBuf>,
    pub storage_ref: Option<String>,
    pub diagnostic: Option<Diagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_accepts_valid_names() {
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::from_secs(5)).unwrap();
        assert_eq!(spec.project(), "curl");
        assert_eq!(spec.fuzz_target(), "curl_fuzzer");
        assert_eq!(spec.backend(), BackendPreference::Auto);
        assert_eq!(spec.options().sanitizer, "address");
    }

    #[test]
    fn test_job_spec_trims_whitespace() {
        let spec = JobSpec::new("  libpng ", "png-fuzzer", Duration::from_secs(1)).unwrap();
        assert_eq!(spec.project(), "libpng");
    }

    #[test]
    fn test_job_spec_rejects_bad_project() {
        for bad in ["", "curl/../etc", "has space", "dot.name"] {
            let err = JobSpec::new(bad, "fuzzer", Duration::from_secs(1)).unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)), "{}", bad);
        }
    }

    #[test]
    fn test_job_spec_rejects_zero_duration() {
        let err = JobSpec::new("curl", "curl_fuzzer", Duration::ZERO).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_job_spec_rejects_zero_memory_limit() {
        let options = EngineOptions {
            max_memory_mb: Some(0),
            ..EngineOptions::default()
        };
        let result = JobSpec::new("curl", "curl_fuzzer", Duration::from_secs(1))
            .unwrap()
            .with_options(options);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_duration_secs_rounds_up() {
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::from_millis(1500)).unwrap();
        assert_eq!(spec.duration_secs(), 2);
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::from_millis(10)).unwrap();
        assert_eq!(spec.duration_secs(), 1);
    }

    #[test]
    fn test_duration_secs_saturates() {
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::MAX).unwrap();
        assert_eq!(spec.duration_secs(), u64::MAX);
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(spec.duration_secs(), u64::MAX);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_backend_preference_parse() {
        assert_eq!("Remote".parse::<BackendPreference>().unwrap(), BackendPreference::Remote);
        assert_eq!("".parse::<BackendPreference>().unwrap(), BackendPreference::Auto);
        assert!(matches!(
            "cloud".parse::<BackendPreference>(),
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }
}
