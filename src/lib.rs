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

//! ossfuzz-jobs: OSS-Fuzz job lifecycle management.
//!
//! Submits fuzzing jobs to a local OSS-Fuzz checkout or a remote fuzzing
//! service, tracks them to a terminal status and normalizes the output of
//! both into one `ExecutionResult`.

pub mod backend;
pub mod config;
pub mod core;
pub mod external;
pub mod manager;
pub mod normalizer;

pub use crate::config::Config;
pub use crate::core::errors::{OrchestratorError, Result};
pub use crate::core::models::{
    BackendKind, BackendPreference, CrashReport, Diagnostic, DiagnosticKind, EngineOptions,
    ExecutionResult, JobHandle, JobId, JobSpec, JobStatus,
};
pub use crate::manager::{JobManager, WaitTimeout};
