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

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::{checkout, config as keys, remote, timing};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::BackendPreference;

/// Capped exponential backoff between polls in `wait_for_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl PollBackoff {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(self.multiplier.max(1)).min(self.max)
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(timing::POLL_INITIAL_MS),
            max: Duration::from_millis(timing::POLL_MAX_MS),
            multiplier: timing::POLL_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local OSS-Fuzz checkout. `None` disables the local backend.
    pub oss_fuzz_dir: Option<PathBuf>,
    /// Root of the per-job output directories.
    pub jobs_dir: PathBuf,
    /// Remote service base URL. `None` disables the remote backend.
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
    /// Time a local run may exceed its duration bound before it is killed.
    pub kill_grace: Duration,
    /// Longest a local build step may run before the job fails.
    pub build_timeout: Duration,
    /// OSS-Fuzz helper invocation used for the build step.
    pub helper_cmd: Vec<String>,
    pub default_backend: BackendPreference,
    pub poll: PollBackoff,
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, `from_env` in production.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let oss_fuzz_dir = match get(keys::ENV_OSS_FUZZ_DIR) {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.join(checkout::PROJECTS_DIR).is_dir() {
                    return Err(OrchestratorError::Configuration(format!(
                        "{} points at {}, which has no {} directory",
                        keys::ENV_OSS_FUZZ_DIR,
                        dir.display(),
                        checkout::PROJECTS_DIR
                    )));
                }
                Some(dir)
            }
            None => locate_checkout(),
        };

        let helper_cmd: Vec<String> = get(keys::ENV_HELPER_CMD)
            .unwrap_or_else(|| keys::DEFAULT_HELPER_CMD.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let default_backend = match get(keys::ENV_BACKEND) {
            Some(value) => value.parse()?,
            None => BackendPreference::Auto,
        };

        let config = Self {
            oss_fuzz_dir,
            jobs_dir: get(keys::ENV_JOBS_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(keys::DEFAULT_JOBS_DIR)),
            remote_url: get(keys::ENV_REMOTE_URL).map(|u| u.trim_end_matches('/').to_string()),
            remote_timeout: Duration::from_secs(parse_u64_or_default(
                &get,
                keys::ENV_REMOTE_TIMEOUT_SECS,
                remote::DEFAULT_REQUEST_TIMEOUT_SECS,
                false,
            )?),
            kill_grace: Duration::from_secs(parse_u64_or_default(
                &get,
                keys::ENV_KILL_GRACE_SECS,
                timing::DEFAULT_KILL_GRACE_SECS,
                true,
            )?),
            build_timeout: Duration::from_secs(parse_u64_or_default(
                &get,
                keys::ENV_BUILD_TIMEOUT_SECS,
                timing::DEFAULT_BUILD_TIMEOUT_SECS,
                false,
            )?),
            helper_cmd,
            default_backend,
            poll: PollBackoff::default(),
            log_level: get(keys::ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string()),
            log_format: get(keys::ENV_LOG_FORMAT).unwrap_or_else(|| "text".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.helper_cmd.is_empty() {
            return Err(OrchestratorError::Configuration(format!(
                "{} is empty",
                keys::ENV_HELPER_CMD
            )));
        }
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(OrchestratorError::Configuration(format!(
                    "{} must be an http(s) URL, got '{}'",
                    keys::ENV_REMOTE_URL,
                    url
                )));
            }
        }
        if self.log_format != "json" && self.log_format != "text" {
            return Err(OrchestratorError::Configuration(format!(
                "{} must be 'json' or 'text', got '{}'",
                keys::ENV_LOG_FORMAT,
                self.log_format
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oss_fuzz_dir: None,
            jobs_dir: PathBuf::from(keys::DEFAULT_JOBS_DIR),
            remote_url: None,
            remote_timeout: Duration::from_secs(remote::DEFAULT_REQUEST_TIMEOUT_SECS),
            kill_grace: Duration::from_secs(timing::DEFAULT_KILL_GRACE_SECS),
            build_timeout: Duration::from_secs(timing::DEFAULT_BUILD_TIMEOUT_SECS),
            helper_cmd: keys::DEFAULT_HELPER_CMD
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            default_backend: BackendPreference::Auto,
            poll: PollBackoff::default(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

fn parse_u64_or_default<G>(get: &G, key: &str, default: u64, allow_zero: bool) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => {
            let parsed = value.trim().parse::<u64>().map_err(|e| {
                OrchestratorError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
            })?;
            if parsed == 0 && !allow_zero {
                return Err(OrchestratorError::Configuration(format!(
                    "{} must be greater than 0",
                    key
                )));
            }
            Ok(parsed)
        }
        None => Ok(default),
    }
}

/// Searches the usual places for an OSS-Fuzz checkout.
fn locate_checkout() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(keys::CHECKOUT_DIR_NAME));
        if let Some(parent) = cwd.parent() {
            candidates.push(parent.join(keys::CHECKOUT_DIR_NAME));
        }
    }
    if let Some(home) = env::var_os("HOME") {
        candidates.push(Path::new(&home).join(keys::CHECKOUT_DIR_NAME));
    }
    candidates.push(env::temp_dir().join(keys::CHECKOUT_DIR_NAME));

    candidates
        .into_iter()
        .find(|dir| dir.join(checkout::PROJECTS_DIR).is_dir())
}
