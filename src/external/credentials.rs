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

//! Remote service credentials.
//!
//! Availability is re-evaluated on every call; nothing is cached.

use std::env;
use std::fs;
use tracing::warn;

use crate::core::constants::config as keys;

pub trait CredentialsProvider: Send + Sync {
    /// Bearer token for the remote service, if any.
    fn remote_token(&self) -> Option<String>;

    fn has_remote_credentials(&self) -> bool {
        self.remote_token().is_some()
    }
}

/// Reads `OSSFUZZ_API_TOKEN`, falling back to the file named by
/// `OSSFUZZ_API_TOKEN_FILE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialsProvider for EnvCredentials {
    fn remote_token(&self) -> Option<String> {
        if let Some(token) = env::var(keys::ENV_API_TOKEN)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            return Some(token);
        }

        let path = env::var_os(keys::ENV_API_TOKEN_FILE)?;
        match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read API token file");
                None
            }
        }
    }
}

/// Fixed credentials, for embedding callers that manage tokens themselves.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn remote_token(&self) -> Option<String> {
        self.token.clone()
    }
}
