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

//! ossfuzz-jobs Constants - Single source of truth for all configuration values.
//!
//! This module centralizes file names, environment variable names, protocol
//! paths and timing defaults so the backends and the manager agree on them.

/// Configuration Environment Variables
pub mod config {
    pub const ENV_OSS_FUZZ_DIR: &str = "OSS_FUZZ_DIR";
    pub const ENV_JOBS_DIR: &str = "OSSFUZZ_JOBS_DIR";
    pub const ENV_REMOTE_URL: &str = "OSSFUZZ_REMOTE_URL";
    pub const ENV_REMOTE_TIMEOUT_SECS: &str = "OSSFUZZ_REMOTE_TIMEOUT_SECS";
    pub const ENV_KILL_GRACE_SECS: &str = "OSSFUZZ_KILL_GRACE_SECS";
    pub const ENV_BUILD_TIMEOUT_SECS: &str = "OSSFUZZ_BUILD_TIMEOUT_SECS";
    pub const ENV_HELPER_CMD: &str = "OSSFUZZ_HELPER_CMD";
    pub const ENV_BACKEND: &str = "OSSFUZZ_BACKEND";
    pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
    pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
    pub const ENV_API_TOKEN: &str = "OSSFUZZ_API_TOKEN";
    pub const ENV_API_TOKEN_FILE: &str = "OSSFUZZ_API_TOKEN_FILE";

    /// Directory name looked for in the usual places when `OSS_FUZZ_DIR` is unset.
    pub const CHECKOUT_DIR_NAME: &str = "oss-fuzz";
    /// Default per-job output root, relative to the working directory.
    pub const DEFAULT_JOBS_DIR: &str = "ossfuzz-jobs";
    /// Default OSS-Fuzz helper invocation, run from the checkout root.
    pub const DEFAULT_HELPER_CMD: &str = "python3 infra/helper.py";
}

/// Layout of an OSS-Fuzz checkout
pub mod checkout {
    pub const PROJECTS_DIR: &str = "projects";
    pub const PROJECT_YAML: &str = "project.yaml";
    pub const BUILD_SCRIPT: &str = "build.sh";
    pub const DOCKERFILE: &str = "Dockerfile";
    /// Prebuilt fuzzers live under `build/out/<project>/`.
    pub const BUILD_OUT_DIR: &str = "build/out";
    /// Naming fallback when the build script lists no targets.
    pub const FALLBACK_TARGET_SUFFIX: &str = "_fuzzer";
}

/// Layout of a local job output directory
pub mod layout {
    pub const FUZZ_LOG: &str = "fuzz.log";
    pub const BUILD_LOG: &str = "build.log";
    pub const CRASHES_DIR: &str = "crashes";
    pub const SUMMARY_FILE: &str = "summary.json";
}

/// libFuzzer engine flags and artifact naming
pub mod engine {
    pub const ENGINE_NAME: &str = "libfuzzer";
    pub const FLAG_MAX_TOTAL_TIME: &str = "-max_total_time=";
    pub const FLAG_ARTIFACT_PREFIX: &str = "-artifact_prefix=";
    pub const FLAG_RSS_LIMIT_MB: &str = "-rss_limit_mb=";
    /// Artifact prefixes written by libFuzzer, most specific first.
    pub const ARTIFACT_KINDS: &[&str] = &["slow-unit", "timeout", "crash", "leak", "oom"];
    pub const DEFAULT_SANITIZER: &str = "address";
    pub const DEFAULT_ARCHITECTURE: &str = "x86_64";
}

/// Remote service REST protocol
pub mod remote {
    pub const JOBS_PATH: &str = "/v1/jobs";
    pub const RESULT_SUFFIX: &str = "/result";
    pub const CANCEL_SUFFIX: &str = "/cancel";
    /// Attempts for transient failures while polling or fetching.
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Base delay between retries, multiplied by the attempt number.
    pub const RETRY_DELAY_MS: u64 = 200;
    pub const CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Public HTTP endpoint for `gs://` storage references.
    pub const GCS_PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";
}

/// Timing defaults
pub mod timing {
    /// Time allowed past the duration bound before a run is forcibly killed.
    pub const DEFAULT_KILL_GRACE_SECS: u64 = 5;
    /// Upper bound on the build step of a local job.
    pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3_600;
    /// Extra wait, on top of the kill grace, for a cancelled run to write its summary.
    pub const WIND_DOWN_MARGIN_MS: u64 = 1_000;
    pub const POLL_INITIAL_MS: u64 = 100;
    pub const POLL_MAX_MS: u64 = 5_000;
    pub const POLL_MULTIPLIER: u32 = 2;
}

/// Input validation limits
pub mod limits {
    pub const MAX_NAME_LENGTH: usize = 128;
    /// Bytes of the fuzz log kept when building a raw local output.
    pub const MAX_LOG_TAIL_BYTES: u64 = 64 * 1024;
}
