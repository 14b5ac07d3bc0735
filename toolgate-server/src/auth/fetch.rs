// Copyright 2025 Toolgate Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded JSON fetching for JWKS and metadata documents
//!
//! The fetcher is a trait so key-cache and discovery tests can inject fakes;
//! production uses reqwest with a per-request timeout. When the transport
//! drops a call, aborting the driving future cancels the in-flight fetch.

use crate::auth::error::AuthError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value, AuthError>;
}

/// reqwest-backed fetcher with a fixed per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value, AuthError> {
        debug!(url, "Fetching metadata document");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ServerMetadata(format!(
                "fetch of {} returned HTTP {}",
                url, status
            )));
        }

        response.json().await.map_err(|e| self.classify(url, e))
    }
}

impl HttpFetcher {
    fn classify(&self, url: &str, error: reqwest::Error) -> AuthError {
        if error.is_timeout() {
            AuthError::DiscoveryTimeout(self.timeout)
        } else {
            AuthError::ServerMetadata(format!("fetch of {} failed: {}", url, error))
        }
    }
}
