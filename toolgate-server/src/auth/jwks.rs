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

//! Key cache & fetcher
//!
//! Resolves public signing keys by key-id, minimizing external fetches.
//! A fetched key set is cached per source for a fixed TTL; outbound fetches
//! are token-bucket capped and fail fast once the cap is hit. Concurrent
//! refreshes of the same source collapse behind a per-source async mutex
//! instead of stampeding the key endpoint.

use crate::auth::error::AuthError;
use crate::auth::fetch::MetadataFetcher;
use dashmap::DashMap;
use jsonwebtoken::DecodingKey;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// JSON Web Key, as published in a JWKS document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// RSA modulus (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    pub fn to_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        if self.kty != "RSA" {
            return Err(AuthError::InvalidToken(format!(
                "unsupported key type '{}'",
                self.kty
            )));
        }
        match (&self.n, &self.e) {
            (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e)
                .map_err(|err| AuthError::ServerMetadata(format!("malformed RSA key: {}", err))),
            _ => Err(AuthError::ServerMetadata(
                "RSA key missing modulus or exponent".to_string(),
            )),
        }
    }
}

/// A published key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// Token bucket guarding outbound key fetches.
struct FetchBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl FetchBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Process-wide cache of key sets, keyed by fetch source.
///
/// Entries are invalidated by TTL expiry only, never by explicit eviction;
/// an expired entry is never served silently past its window.
pub struct KeyStore {
    fetcher: Arc<dyn MetadataFetcher>,
    cache: Cache<String, Arc<JwkSet>>,
    bucket: Mutex<FetchBucket>,
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl KeyStore {
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        ttl: Duration,
        fetch_limit_per_minute: u32,
    ) -> Self {
        Self {
            fetcher,
            cache: Cache::builder().time_to_live(ttl).build(),
            bucket: Mutex::new(FetchBucket::new(fetch_limit_per_minute)),
            refresh_locks: DashMap::new(),
        }
    }

    /// Resolve the decoding key for `kid` from `source`, fetching the key
    /// set if it is absent, expired, or does not contain the key-id
    /// (key rotation).
    pub async fn decoding_key(&self, source: &str, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(set) = self.cache.get(source) {
            if let Some(jwk) = set.find(kid) {
                return jwk.to_decoding_key();
            }
        }

        let lock = self
            .refresh_locks
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(set) = self.cache.get(source) {
            if let Some(jwk) = set.find(kid) {
                return jwk.to_decoding_key();
            }
        }

        let set = self.fetch(source).await?;
        match set.find(kid) {
            Some(jwk) => jwk.to_decoding_key(),
            None => Err(AuthError::InvalidToken(format!(
                "no key with id '{}' at the configured key source",
                kid
            ))),
        }
    }

    async fn fetch(&self, source: &str) -> Result<Arc<JwkSet>, AuthError> {
        if !self.bucket.lock().try_acquire() {
            info!(source, "JWKS fetch rate limit hit, failing fast");
            return Err(AuthError::RateLimited);
        }

        debug!(source, "Fetching JWKS");
        let document = self.fetcher.fetch_json(source).await?;
        let set: JwkSet = serde_json::from_value(document)
            .map_err(|e| AuthError::ServerMetadata(format!("malformed JWKS document: {}", e)))?;
        let set = Arc::new(set);
        self.cache.insert(source.to_string(), Arc::clone(&set));
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // from_rsa_components only base64url-decodes the components, so a short
    // modulus is enough for cache behavior tests.
    fn fake_jwks(kid: &str) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": kid,
                "alg": "RS256",
                "n": "sXchYmzhbpDbTm_GPS1iRhCTKOYIc6czdj8YuBSufM4",
                "e": "AQAB"
            }]
        })
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        kid: String,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(kid: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                kid: kid.to_string(),
                delay: Duration::ZERO,
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataFetcher for CountingFetcher {
        async fn fetch_json(&self, _url: &str) -> Result<Value, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(fake_jwks(&self.kid))
        }
    }

    const SOURCE: &str = "https://as.example.com/jwks";

    #[tokio::test]
    async fn test_second_lookup_within_ttl_hits_cache() {
        let fetcher = Arc::new(CountingFetcher::new("k1"));
        let store = KeyStore::new(fetcher.clone(), Duration::from_secs(600), 10);

        store.decoding_key(SOURCE, "k1").await.unwrap();
        store.decoding_key(SOURCE, "k1").await.unwrap();
        assert_eq!(fetcher.count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_exactly_one_refetch() {
        let fetcher = Arc::new(CountingFetcher::new("k1"));
        let store = KeyStore::new(fetcher.clone(), Duration::from_millis(50), 10);

        store.decoding_key(SOURCE, "k1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.decoding_key(SOURCE, "k1").await.unwrap();
        assert_eq!(fetcher.count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            kid: "k1".to_string(),
            delay: Duration::from_millis(30),
        });
        let store = Arc::new(KeyStore::new(fetcher.clone(), Duration::from_secs(600), 10));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.decoding_key(SOURCE, "k1").await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fetcher.count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_cap_fails_fast() {
        let fetcher = Arc::new(CountingFetcher::new("rotating"));
        // Cap of 2/minute; unknown kids force a fetch attempt every time.
        let store = KeyStore::new(fetcher.clone(), Duration::from_secs(600), 2);

        assert!(store.decoding_key(SOURCE, "missing-1").await.is_err());
        assert!(store.decoding_key(SOURCE, "missing-2").await.is_err());
        let err = store.decoding_key(SOURCE, "missing-3").await.err().unwrap();
        assert!(matches!(err, AuthError::RateLimited));
        assert_eq!(fetcher.count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_after_refresh_is_invalid_token() {
        let fetcher = Arc::new(CountingFetcher::new("k1"));
        let store = KeyStore::new(fetcher.clone(), Duration::from_secs(600), 10);

        let err = store.decoding_key(SOURCE, "k2").await.err().unwrap();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_non_rsa_key_rejected() {
        let jwk = Jwk {
            kty: "EC".into(),
            use_: None,
            alg: None,
            kid: Some("k1".into()),
            n: None,
            e: None,
        };
        assert!(matches!(
            jwk.to_decoding_key(),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
