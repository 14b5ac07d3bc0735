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

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Toolgate server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Service identity reported on the health surface and in listings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_version")]
    pub version: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require bearer authentication on tool calls
    #[serde(default)]
    pub enabled: bool,

    /// Authorization server base URL (issuer). Required when enabled
    /// unless a custom verifier is supplied.
    #[serde(default)]
    pub authorization_server: Option<String>,

    /// Canonical URL of this protected resource
    #[serde(default)]
    pub resource: Option<String>,

    /// Explicit JWKS URI; when absent it is discovered from the
    /// authorization server's metadata document
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Expected `aud` claim; audience validation is skipped when unset
    #[serde(default)]
    pub audience: Option<String>,

    /// Scopes every token must carry before any handler runs
    #[serde(default)]
    pub required_scopes: Vec<String>,

    /// Signing algorithm allow-list
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: Vec<String>,

    /// JWKS cache TTL in seconds
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_secs: u64,

    /// Outbound JWKS/metadata fetch cap per minute; attempts beyond the
    /// cap fail fast instead of queueing
    #[serde(default = "default_jwks_fetch_limit")]
    pub jwks_fetch_limit_per_minute: u32,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,

    /// Clock-skew leeway for `exp`/`nbf` in seconds
    #[serde(default)]
    pub leeway_secs: u64,

    /// Permit plain-HTTP JWKS URIs (loopback hosts are always permitted)
    #[serde(default)]
    pub allow_insecure_jwks: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            authorization_server: None,
            resource: None,
            jwks_uri: None,
            audience: None,
            required_scopes: Vec::new(),
            allowed_algorithms: default_allowed_algorithms(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl(),
            jwks_fetch_limit_per_minute: default_jwks_fetch_limit(),
            discovery_timeout_secs: default_discovery_timeout(),
            leeway_secs: 0,
            allow_insecure_jwks: false,
        }
    }
}

/// Pipeline limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Event channel capacity; slow subscribers past this lag drop events
    /// rather than stalling calls
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_service_name() -> String {
    "toolgate".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_allowed_algorithms() -> Vec<String> {
    vec!["RS256".to_string(), "RS384".to_string(), "RS512".to_string()]
}

fn default_jwks_cache_ttl() -> u64 {
    600
}

fn default_jwks_fetch_limit() -> u32 {
    10
}

fn default_discovery_timeout() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    256
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (TOOLGATE_AUTH_SERVER, TOOLGATE_RESOURCE,
    /// TOOLGATE_JWKS_URI, TOOLGATE_REQUIRED_SCOPES as space-separated list).
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(server) = std::env::var("TOOLGATE_AUTH_SERVER") {
            self.auth.authorization_server = Some(server);
            self.auth.enabled = true;
        }
        if let Ok(resource) = std::env::var("TOOLGATE_RESOURCE") {
            self.auth.resource = Some(resource);
        }
        if let Ok(uri) = std::env::var("TOOLGATE_JWKS_URI") {
            self.auth.jwks_uri = Some(uri);
        }
        if let Ok(scopes) = std::env::var("TOOLGATE_REQUIRED_SCOPES") {
            self.auth.required_scopes =
                scopes.split_whitespace().map(String::from).collect();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled
            && self.auth.authorization_server.is_none()
            && self.auth.jwks_uri.is_none()
        {
            anyhow::bail!(
                "auth.enabled requires auth.authorization_server or auth.jwks_uri \
                 (or a custom verifier supplied at build time)"
            );
        }
        if self.auth.allowed_algorithms.is_empty() {
            anyhow::bail!("auth.allowed_algorithms must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.jwks_cache_ttl_secs, 600);
        assert_eq!(config.auth.jwks_fetch_limit_per_minute, 10);
        assert_eq!(config.auth.discovery_timeout_secs, 5);
        assert_eq!(
            config.auth.allowed_algorithms,
            vec!["RS256", "RS384", "RS512"]
        );
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [identity]
            name = "greeter"

            [auth]
            enabled = true
            authorization_server = "https://as.example.com"
            resource = "https://rs.example.com/mcp"
            required_scopes = ["tools:read", "tools:call"]
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.identity.name, "greeter");
        assert!(config.auth.enabled);
        assert_eq!(
            config.auth.required_scopes,
            vec!["tools:read", "tools:call"]
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_enabled_auth_without_server_is_invalid() {
        let mut config = ServerConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.jwks_uri = Some("https://as.example.com/jwks".into());
        assert!(config.validate().is_ok());
    }
}
