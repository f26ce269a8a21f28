//! Signing key discovery for identity-provider tokens
//!
//! `RemoteJwksResolver` fetches the provider's whole JWKS document and keeps
//! every decoded key for a fixed window. A `kid` missing from a fresh document
//! triggers at most one refetch per refetch interval, so tokens naming unknown
//! keys cannot drive traffic to the key endpoint.

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AuthzError, Result};

/// Default minimum spacing between fetches caused by unknown key ids
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Signing key lookup by key id
#[async_trait]
pub trait JwksResolver: Send + Sync {
    /// Resolve the public key for `kid`. Fails for unknown key ids.
    async fn signing_key(&self, kid: &str) -> Result<DecodingKey>;
}

/// JWKS response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, etc.)
    pub kty: String,

    /// Key use (sig, enc)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    fn is_rsa_signing_key(&self) -> bool {
        self.kty == "RSA" && self.use_.as_deref().map_or(true, |u| u == "sig")
    }
}

fn unknown_kid(kid: &str) -> AuthzError {
    AuthzError::KeyResolution(format!("Key with kid '{}' not found", kid))
}

impl Jwks {
    /// Build the decoding key for `kid`
    pub fn find_key(&self, kid: &str) -> Result<DecodingKey> {
        let key = self
            .keys
            .iter()
            .filter(|key| key.is_rsa_signing_key())
            .find(|key| key.kid.as_deref() == Some(kid))
            .ok_or_else(|| unknown_kid(kid))?;

        let n = key
            .n
            .as_deref()
            .ok_or_else(|| AuthzError::KeyResolution("Missing RSA modulus".to_string()))?;
        let e = key
            .e
            .as_deref()
            .ok_or_else(|| AuthzError::KeyResolution("Missing RSA exponent".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| AuthzError::KeyResolution(format!("Invalid RSA key components: {}", e)))
    }

    /// Every usable RSA signing key by `kid`. Malformed entries are skipped.
    pub fn signing_keys(&self) -> HashMap<String, DecodingKey> {
        self.keys
            .iter()
            .filter(|key| key.is_rsa_signing_key())
            .filter_map(|key| key.kid.as_deref())
            .filter_map(|kid| match self.find_key(kid) {
                Ok(key) => Some((kid.to_string(), key)),
                Err(e) => {
                    warn!(kid, error = %e, "Skipping unusable JWKS entry");
                    None
                }
            })
            .collect()
    }
}

/// Fixed set of signing keys
#[derive(Clone, Default)]
pub struct StaticJwksResolver {
    keys: HashMap<String, DecodingKey>,
}

impl StaticJwksResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    /// Register a PEM-encoded RSA public key
    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| AuthzError::Config(format!("Invalid RSA public key: {}", e)))?;
        Ok(self.with_key(kid, key))
    }

    /// Register every RSA signing key of a JWKS document
    pub fn from_jwks_json(json: &str) -> Result<Self> {
        let jwks: Jwks = serde_json::from_str(json)
            .map_err(|e| AuthzError::Config(format!("Failed to parse JWKS: {}", e)))?;

        Ok(Self {
            keys: jwks.signing_keys(),
        })
    }
}

#[async_trait]
impl JwksResolver for StaticJwksResolver {
    async fn signing_key(&self, kid: &str) -> Result<DecodingKey> {
        self.keys.get(kid).cloned().ok_or_else(|| unknown_kid(kid))
    }
}

/// Last fetched document and when the endpoint was last contacted
#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
}

enum Lookup {
    Hit(DecodingKey),
    /// Not found, and the endpoint was contacted too recently to try again
    Miss,
    Refetch,
}

impl KeyCache {
    fn lookup(&self, kid: &str, cache_ttl: Duration, refetch_interval: Duration) -> Lookup {
        let fresh = self.fetched_at.map_or(false, |at| at.elapsed() < cache_ttl);
        if fresh {
            if let Some(key) = self.keys.get(kid) {
                return Lookup::Hit(key.clone());
            }
        }

        // An expired document is always refetched, even inside the throttle window
        let throttle = refetch_interval.min(cache_ttl);
        match self.attempted_at {
            Some(at) if at.elapsed() < throttle => Lookup::Miss,
            _ => Lookup::Refetch,
        }
    }
}

/// JWKS resolver backed by an HTTPS key endpoint
pub struct RemoteJwksResolver {
    client: reqwest::Client,
    jwks_uri: String,
    cache_ttl: Duration,
    refetch_interval: Duration,
    cache: RwLock<KeyCache>,
}

impl RemoteJwksResolver {
    pub fn new(jwks_uri: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            jwks_uri: jwks_uri.into(),
            cache_ttl,
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
            cache: RwLock::new(KeyCache::default()),
        }
    }

    /// Minimum spacing between fetches for key ids the document does not hold
    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    async fn fetch_jwks(&self) -> Result<Jwks> {
        let response = self
            .client
            .get(&self.jwks_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthzError::KeyResolution(format!("Failed to send JWKS request: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthzError::KeyResolution(format!(
                "JWKS fetch failed with status: {}",
                response.status()
            )));
        }

        response
            .json::<Jwks>()
            .await
            .map_err(|e| AuthzError::KeyResolution(format!("Failed to parse JWKS: {}", e)))
    }
}

#[async_trait]
impl JwksResolver for RemoteJwksResolver {
    async fn signing_key(&self, kid: &str) -> Result<DecodingKey> {
        let lookup = self.cache.read().await.lookup(kid, self.cache_ttl, self.refetch_interval);
        match lookup {
            Lookup::Hit(key) => {
                debug!(kid, "Got JWKS signing key from cache");
                return Ok(key);
            }
            Lookup::Miss => return Err(unknown_kid(kid)),
            Lookup::Refetch => {}
        }

        let mut cache = self.cache.write().await;

        // Another request may have refreshed the document while this one waited
        match cache.lookup(kid, self.cache_ttl, self.refetch_interval) {
            Lookup::Hit(key) => return Ok(key),
            Lookup::Miss => return Err(unknown_kid(kid)),
            Lookup::Refetch => {}
        }

        cache.attempted_at = Some(Instant::now());
        let jwks = self.fetch_jwks().await?;

        cache.keys = jwks.signing_keys();
        cache.fetched_at = cache.attempted_at;
        debug!(kid, keys = cache.keys.len(), "Fetched JWKS document from server");

        cache.keys.get(kid).cloned().ok_or_else(|| unknown_kid(kid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWKS: &str = r#"{
        "keys": [
            {"kty": "EC", "use": "sig", "kid": "ec-key", "crv": "P-256"},
            {"kty": "RSA", "use": "enc", "kid": "enc-key", "n": "AQAB", "e": "AQAB"},
            {"kty": "RSA", "use": "sig", "kid": "no-modulus", "e": "AQAB"},
            {"kty": "RSA", "use": "sig", "kid": "good", "alg": "RS256",
             "n": "l3XGkMoy3aa1CObYot9FPTQ1jHI7d4CJkh1vuWXU", "e": "AQAB"}
        ]
    }"#;

    #[test]
    fn test_find_key_by_kid() {
        let jwks: Jwks = serde_json::from_str(JWKS).unwrap();
        assert!(jwks.find_key("good").is_ok());
    }

    #[test]
    fn test_find_key_rejects_non_signing_keys() {
        let jwks: Jwks = serde_json::from_str(JWKS).unwrap();

        assert!(matches!(jwks.find_key("ec-key"), Err(AuthzError::KeyResolution(_))));
        assert!(matches!(jwks.find_key("enc-key"), Err(AuthzError::KeyResolution(_))));
        assert!(matches!(jwks.find_key("no-modulus"), Err(AuthzError::KeyResolution(_))));
        assert!(matches!(jwks.find_key("unknown"), Err(AuthzError::KeyResolution(_))));
    }

    #[test]
    fn test_signing_keys_skip_unusable_entries() {
        let jwks: Jwks = serde_json::from_str(JWKS).unwrap();
        let keys = jwks.signing_keys();

        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("good"));
    }

    #[test]
    fn test_cache_lookup_throttles_unknown_kids() {
        let cache = KeyCache {
            keys: HashMap::new(),
            fetched_at: Some(Instant::now()),
            attempted_at: Some(Instant::now()),
        };
        let ttl = Duration::from_secs(300);

        assert!(matches!(cache.lookup("other", ttl, Duration::from_secs(60)), Lookup::Miss));
        assert!(matches!(cache.lookup("other", ttl, Duration::ZERO), Lookup::Refetch));
        assert!(matches!(KeyCache::default().lookup("other", ttl, Duration::from_secs(60)), Lookup::Refetch));
    }

    #[tokio::test]
    async fn test_static_resolver_unknown_kid() {
        let resolver = StaticJwksResolver::from_jwks_json(JWKS).unwrap();

        assert!(resolver.signing_key("good").await.is_ok());
        assert!(matches!(
            resolver.signing_key("other").await,
            Err(AuthzError::KeyResolution(_))
        ));
    }
}
