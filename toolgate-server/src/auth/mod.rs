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

//! Bearer-token authentication
//!
//! The [`Authenticator`] runs at the transport boundary, before the
//! execution pipeline: it extracts the bearer token, verifies it through
//! the configured [`TokenVerifier`], enforces statically required scopes,
//! and derives the [`AuthContext`] that is stamped into call metadata.
//! Every failure short-circuits the request with a standards-compliant
//! error before any handler executes.

pub mod error;
pub mod fetch;
pub mod jwks;
pub mod metadata;
pub mod verifier;

pub use error::AuthError;
pub use fetch::{HttpFetcher, MetadataFetcher};
pub use jwks::{Jwk, JwkSet, KeyStore};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use verifier::{JwksTokenVerifier, TokenVerifier, ValidatedToken};

use crate::config::AuthConfig;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use toolgate_core::{AuthContext, RequestMeta};
use tracing::debug;

pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    required_scopes: Vec<String>,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, required_scopes: Vec<String>) -> Self {
        Self {
            verifier,
            required_scopes,
        }
    }

    /// Build the JWKS-backed authenticator from configuration.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let fetcher: Arc<dyn MetadataFetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.discovery_timeout_secs,
        ))?);
        let verifier = Arc::new(JwksTokenVerifier::new(config, fetcher)?);
        Ok(Self::new(verifier, config.required_scopes.clone()))
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    /// Authenticate one request from its `Authorization` header value.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<AuthContext, AuthError> {
        let token = extract_bearer_token(authorization)?;
        let validated = self.verifier.verify(token).await?;

        // Expiry is enforced here for both verifier paths; a custom verifier
        // returning a stale expiry does not get a pass.
        if let Some(expires_at) = validated.expires_at {
            if expires_at <= now_epoch_secs() {
                return Err(AuthError::InvalidToken("token expired".to_string()));
            }
        }

        let missing: Vec<String> = self
            .required_scopes
            .iter()
            .filter(|scope| !validated.scopes.iter().any(|granted| granted == *scope))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!(?missing, "Token missing required scopes");
            return Err(AuthError::InsufficientScope {
                required: self.required_scopes.clone(),
                missing,
            });
        }

        Ok(build_auth_context(validated))
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
///
/// Absent header, wrong scheme, and empty token are deliberately the same
/// error kind.
pub fn extract_bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let header = authorization.ok_or(AuthError::MissingToken)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MissingToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    if !is_valid_token_format(token) {
        return Err(AuthError::InvalidToken(
            "malformed bearer token".to_string(),
        ));
    }
    Ok(token)
}

/// RFC 6750 b64token charset: ALPHA / DIGIT / "-" / "." / "_" / "~" / "+"
/// / "/", with optional trailing "=" padding.
fn is_valid_token_format(token: &str) -> bool {
    let trimmed = token.trim_end_matches('=');
    if trimmed.is_empty() {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/'))
}

/// Stamp verified auth data into call metadata under well-known keys.
///
/// The caller-supplied "subject" value, if any, is always overwritten by the
/// verified token's subject; identity is never trusted from the request body.
pub fn inject_auth(meta: &mut RequestMeta, auth: &AuthContext) {
    meta.subject = Some(auth.subject.clone());
    meta.extra.insert("auth".to_string(), auth.to_meta_value());
}

fn build_auth_context(validated: ValidatedToken) -> AuthContext {
    let subject = validated
        .extra
        .get("sub")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| validated.client_id.clone())
        .unwrap_or_default();
    let issuer = validated
        .extra
        .get("iss")
        .and_then(Value::as_str)
        .map(String::from);
    let audience = validated.extra.get("aud").and_then(|aud| match aud {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(String::from),
        _ => None,
    });

    AuthContext {
        subject,
        client_id: validated.client_id,
        scopes: validated.scopes,
        expires_at: validated.expires_at,
        issuer,
        audience,
        token: validated.token,
        extra: validated.extra,
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
