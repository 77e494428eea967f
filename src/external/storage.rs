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

//! Storage references: `gs://`, `http(s)://` and `file://` locations of
//! result payloads that the remote service does not return inline.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::constants::remote;
use crate::core::errors::{OrchestratorError, Result};
use crate::external::credentials::CredentialsProvider;

#[async_trait]
pub trait StorageFetcher: Send + Sync {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes>;
}

pub struct HttpStorage {
    http_client: Client,
    gcs_endpoint: String,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl HttpStorage {
    pub fn new(
        timeout: Duration,
        credentials: Option<Arc<dyn CredentialsProvider>>,
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
            gcs_endpoint: remote::GCS_PUBLIC_ENDPOINT.to_string(),
            credentials,
        })
    }

    /// Overrides the endpoint `gs://` references resolve against.
    pub fn with_gcs_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.gcs_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn resolve(&self, reference: &str) -> Result<Location> {
        if let Some(rest) = reference.strip_prefix("gs://") {
            if rest.is_empty() || !rest.contains('/') {
                return Err(OrchestratorError::ResultsUnavailable(format!(
                    "malformed storage reference '{}'",
                    reference
                )));
            }
            return Ok(Location::Http(format!("{}/{}", self.gcs_endpoint, rest)));
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(Location::Http(reference.to_string()));
        }
        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(Location::File(path.to_string()));
        }
        Err(OrchestratorError::ResultsUnavailable(format!(
            "unsupported storage reference '{}'",
            reference
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Http(String),
    File(String),
}

#[async_trait]
impl StorageFetcher for HttpStorage {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes> {
        let url = match self.resolve(reference)? {
            Location::File(path) => {
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    OrchestratorError::ResultsUnavailable(format!("cannot read {}: {}", path, e))
                })?;
                return Ok(Bytes::from(data));
            }
            Location::Http(url) => url,
        };

        debug!(reference = %reference, url = %url, "Fetching storage reference");
        let mut request = self.http_client.get(&url);
        if let Some(token) = self.credentials.as_ref().and_then(|c| c.remote_token()) {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            OrchestratorError::ResultsUnavailable(format!("storage request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::ResultsUnavailable(format!(
                "storage returned HTTP {} for {}",
                status, reference
            )));
        }
        response.bytes().await.map_err(|e| {
            OrchestratorError::ResultsUnavailable(format!("storage body unreadable: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> HttpStorage {
        HttpStorage::new(Duration::from_secs(5), None).unwrap()
    }

    #[test]
    fn test_resolve_gcs_reference() {
        let location = storage().resolve("gs://oss-fuzz-results/curl/42.json").unwrap();
        assert_eq!(
            location,
            Location::Http("https://storage.googleapis.com/oss-fuzz-results/curl/42.json".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_scheme() {
        assert!(matches!(
            storage().resolve("s3://bucket/key"),
            Err(OrchestratorError::ResultsUnavailable(_))
        ));
        assert!(matches!(
            storage().resolve("gs://bucket-only"),
            Err(OrchestratorError::ResultsUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, b"{\"executions\": 7}").unwrap();

        let bytes = storage()
            .fetch_bytes(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"{\"executions\": 7}");
    }
}
