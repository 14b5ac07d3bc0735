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

//! Authentication errors
//!
//! Each variant carries a machine-readable RFC 6750 error code, an HTTP
//! status, and a `WWW-Authenticate` challenge rendering. The challenge
//! builder is a pure function so the quoted-string escaping stays
//! unit-testable independent of any transport.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Absent header, wrong scheme, or empty token. One kind on purpose:
    /// callers get no signal about which part was missing.
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Reported collectively: `missing` lists every absent scope, and the
    /// challenge advertises the full required list so a client can retry.
    #[error("insufficient scope")]
    InsufficientScope {
        required: Vec<String>,
        missing: Vec<String>,
    },

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    /// Authorization-server metadata problems: unreachable document,
    /// issuer mismatch, insecure key-source transport.
    #[error("authorization server metadata error: {0}")]
    ServerMetadata(String),

    /// Key discovery exceeded its per-fetch bound. Distinct from generic
    /// network failure so operators can tell slow IdPs from broken ones.
    #[error("key discovery timed out after {0:?}")]
    DiscoveryTimeout(Duration),

    /// Outbound key-fetch cap reached; failing fast instead of queueing.
    #[error("key fetch rate limit exceeded")]
    RateLimited,

    #[error("authentication backend error: {0}")]
    Internal(String),
}

impl AuthError {
    /// RFC 6750 error code carried in the challenge.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken(_) => "invalid_token",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::ServerMetadata(_)
            | AuthError::DiscoveryTimeout(_)
            | AuthError::RateLimited
            | AuthError::Internal(_) => "server_error",
        }
    }

    /// HTTP status the transport should map this failure to.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken(_) => 401,
            AuthError::InsufficientScope { .. } => 403,
            AuthError::InvalidRequest(_) => 400,
            AuthError::ServerMetadata(_)
            | AuthError::DiscoveryTimeout(_)
            | AuthError::RateLimited
            | AuthError::Internal(_) => 500,
        }
    }

    /// Caller-facing description. Never contains token or signature
    /// material; backend detail is collapsed to a generic phrase.
    pub fn description(&self) -> String {
        match self {
            AuthError::MissingToken => "Bearer token required".to_string(),
            AuthError::InvalidToken(reason) => reason.clone(),
            AuthError::InsufficientScope { missing, .. } => {
                format!("Missing required scopes: {}", missing.join(", "))
            }
            AuthError::InvalidRequest(reason) => reason.clone(),
            AuthError::ServerMetadata(_)
            | AuthError::DiscoveryTimeout(_)
            | AuthError::RateLimited
            | AuthError::Internal(_) => "Authentication temporarily unavailable".to_string(),
        }
    }

    /// Render the `WWW-Authenticate` challenge:
    /// `Bearer realm="..."[, error="...", error_description="..."][, scope="..."]`
    pub fn www_authenticate(&self, realm: &str) -> String {
        let mut challenge = format!("Bearer realm=\"{}\"", escape_quoted(realm));
        challenge.push_str(&format!(", error=\"{}\"", self.error_code()));
        challenge.push_str(&format!(
            ", error_description=\"{}\"",
            escape_quoted(&self.description())
        ));
        if let AuthError::InsufficientScope { required, .. } = self {
            challenge.push_str(&format!(
                ", scope=\"{}\"",
                escape_quoted(&required.join(" "))
            ));
        }
        challenge
    }
}

/// RFC 7235 quoted-string escaping: backslashes first, then quotes.
fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
