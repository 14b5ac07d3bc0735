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

//! Token verification
//!
//! Exactly one verifier runs per call, selected at startup: either the
//! JWKS-backed [`JwksTokenVerifier`] or a caller-supplied implementation of
//! [`TokenVerifier`] returning an equivalent result.

use crate::auth::error::AuthError;
use crate::auth::fetch::MetadataFetcher;
use crate::auth::jwks::KeyStore;
use crate::auth::metadata::{check_key_source_transport, discover_jwks_uri};
use crate::config::AuthConfig;
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Outcome of a successful verification. Produced once per call and never
/// persisted beyond it.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub token: String,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    /// `exp`, epoch seconds.
    pub expires_at: Option<u64>,
    /// Remaining claims (`sub`, `iss`, `aud`, and anything custom).
    pub extra: Map<String, Value>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ValidatedToken, AuthError>;
}

/// Claims we pull out of a decoded JWT; everything else lands in `extra`.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    exp: Option<u64>,
    scope: Option<String>,
    scp: Option<Vec<String>>,
    client_id: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TokenClaims {
    fn into_validated(self, token: &str) -> ValidatedToken {
        let mut extra = self.extra;
        if let Some(sub) = &self.sub {
            extra.insert("sub".to_string(), Value::String(sub.clone()));
        }
        // Scopes arrive either as a space-separated `scope` string or an
        // `scp` array depending on the authorization server.
        let scopes = match (self.scope, self.scp) {
            (Some(joined), _) => joined.split_whitespace().map(String::from).collect(),
            (None, Some(list)) => list,
            (None, None) => Vec::new(),
        };
        ValidatedToken {
            token: token.to_string(),
            client_id: self.client_id,
            scopes,
            expires_at: self.exp,
            extra,
        }
    }
}

/// Signature verification against keys resolved by key-id from the cache,
/// validating issuer, audience, expiry, and the algorithm allow-list.
pub struct JwksTokenVerifier {
    fetcher: Arc<dyn MetadataFetcher>,
    keys: KeyStore,
    algorithms: Vec<Algorithm>,
    issuer: Option<String>,
    audience: Option<String>,
    explicit_jwks_uri: Option<String>,
    allow_insecure: bool,
    leeway_secs: u64,
    /// Resolved lazily on first verification, then memoized; startup does
    /// not require the authorization server to be reachable.
    jwks_uri: OnceCell<String>,
}

impl JwksTokenVerifier {
    pub fn new(config: &AuthConfig, fetcher: Arc<dyn MetadataFetcher>) -> Result<Self, AuthError> {
        let algorithms = config
            .allowed_algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| AuthError::Internal(format!("unsupported algorithm '{}'", name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            fetcher: Arc::clone(&fetcher),
            keys: KeyStore::new(
                fetcher,
                Duration::from_secs(config.jwks_cache_ttl_secs),
                config.jwks_fetch_limit_per_minute,
            ),
            algorithms,
            issuer: config.authorization_server.clone(),
            audience: config.audience.clone(),
            explicit_jwks_uri: config.jwks_uri.clone(),
            allow_insecure: config.allow_insecure_jwks,
            leeway_secs: config.leeway_secs,
            jwks_uri: OnceCell::new(),
        })
    }

    async fn jwks_uri(&self) -> Result<&str, AuthError> {
        self.jwks_uri
            .get_or_try_init(|| async {
                match &self.explicit_jwks_uri {
                    Some(uri) => {
                        check_key_source_transport(uri, self.allow_insecure)?;
                        Ok(uri.clone())
                    }
                    None => {
                        let issuer = self.issuer.as_deref().ok_or_else(|| {
                            AuthError::Internal(
                                "no JWKS URI or authorization server configured".to_string(),
                            )
                        })?;
                        discover_jwks_uri(self.fetcher.as_ref(), issuer, self.allow_insecure).await
                    }
                }
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl TokenVerifier for JwksTokenVerifier {
    async fn verify(&self, token: &str) -> Result<ValidatedToken, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("malformed token header: {}", e)))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "signing algorithm {:?} is not allowed",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token header missing key id".to_string()))?;

        let jwks_uri = self.jwks_uri().await?;
        let key = self.keys.decoding_key(jwks_uri, &kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.algorithms.clone();
        validation.leeway = self.leeway_secs;
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<TokenClaims>(token, &key, &validation).map_err(classify)?;
        debug!(kid = %kid, "Token signature verified");
        Ok(data.claims.into_validated(token))
    }
}

fn classify(error: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    let reason = match error.kind() {
        ErrorKind::ExpiredSignature => "token expired".to_string(),
        ErrorKind::InvalidSignature => "signature verification failed".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidAudience => "audience mismatch".to_string(),
        ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
        other => format!("token rejected: {:?}", other),
    };
    AuthError::InvalidToken(reason)
}
