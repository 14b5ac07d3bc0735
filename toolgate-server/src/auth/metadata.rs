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

//! Discovery metadata
//!
//! Two read-only documents: the authorization server's metadata (consumed,
//! to locate its key source) and this service's protected-resource metadata
//! (exposed, so clients can find the authorization server).

use crate::auth::error::AuthError;
use crate::auth::fetch::MetadataFetcher;
use crate::config::AuthConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

/// Authorization server metadata document (RFC 8414 subset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata describing this service as a protected resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    pub fn from_config(auth: &AuthConfig) -> Option<Self> {
        let resource = auth.resource.clone()?;
        Some(Self {
            resource,
            authorization_servers: auth.authorization_server.iter().cloned().collect(),
            scopes_supported: auth.required_scopes.clone(),
            bearer_methods_supported: vec!["header".to_string()],
        })
    }
}

/// Resolve the JWKS URI from the authorization server's metadata document.
///
/// The document's issuer must exactly match the configured authorization
/// server; any mismatch is a hard failure before any key is fetched. The
/// key-source URI must use HTTPS unless it points at a loopback host or
/// insecure transports were explicitly allowed.
pub async fn discover_jwks_uri(
    fetcher: &dyn MetadataFetcher,
    authorization_server: &str,
    allow_insecure: bool,
) -> Result<String, AuthError> {
    let metadata_url = well_known_url(authorization_server)?;
    debug!(url = %metadata_url, "Discovering authorization server metadata");

    let document = fetcher.fetch_json(&metadata_url).await?;
    let metadata: AuthorizationServerMetadata = serde_json::from_value(document)
        .map_err(|e| AuthError::ServerMetadata(format!("malformed metadata document: {}", e)))?;

    if normalize(&metadata.issuer) != normalize(authorization_server) {
        return Err(AuthError::ServerMetadata(format!(
            "issuer mismatch: metadata declares '{}' but '{}' is configured",
            metadata.issuer, authorization_server
        )));
    }

    check_key_source_transport(&metadata.jwks_uri, allow_insecure)?;
    Ok(metadata.jwks_uri)
}

/// Enforce secure transport on a key-source URI.
pub fn check_key_source_transport(uri: &str, allow_insecure: bool) -> Result<(), AuthError> {
    let parsed = Url::parse(uri)
        .map_err(|e| AuthError::ServerMetadata(format!("invalid key-source URI '{}': {}", uri, e)))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure || is_loopback(&parsed) => Ok(()),
        other => Err(AuthError::ServerMetadata(format!(
            "key-source URI must use https, got '{}'",
            other
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1"))
}

fn well_known_url(authorization_server: &str) -> Result<String, AuthError> {
    let parsed = Url::parse(authorization_server).map_err(|e| {
        AuthError::ServerMetadata(format!(
            "invalid authorization server URL '{}': {}",
            authorization_server, e
        ))
    })?;
    if parsed.cannot_be_a_base() {
        return Err(AuthError::ServerMetadata(format!(
            "authorization server URL '{}' is not a base URL",
            authorization_server
        )));
    }
    Ok(format!(
        "{}/.well-known/oauth-authorization-server",
        authorization_server.trim_end_matches('/')
    ))
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}
