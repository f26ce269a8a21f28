//! API key authentication
//!
//! Keys look like `acmuiuc_<id>_<secret>_<checksum>`: a 12 hex character id,
//! a 64 hex character secret and the first 6 hex characters of the secret's
//! SHA-256. The record is looked up by id and the secret is checked against
//! the stored hash. Roles come straight from the record; no role source is
//! consulted.

use dashmap::DashMap;
use jsonwebtoken::get_current_timestamp;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::store::{ApiKeyRecord, ApiKeyStore};

/// First segment of every key
pub const API_KEY_PREFIX: &str = "acmuiuc";

/// How long a looked-up record (or its absence) is reused
pub const API_KEY_CACHE_TTL: Duration = Duration::from_secs(120);

/// Message for every malformed, unknown, expired or mismatched key
pub const INVALID_API_KEY_MESSAGE: &str = "Invalid API key.";

const KEY_ID_LEN: usize = 12;
const RAW_KEY_LEN: usize = 64;
const CHECKSUM_LEN: usize = 6;

/// Cached records past this count trigger a purge of expired ones
const MAX_CACHED_RECORDS: usize = 10_000;

fn invalid_api_key() -> AuthzError {
    AuthzError::Unauthenticated(INVALID_API_KEY_MESSAGE.to_string())
}

/// Segments of a well-formed key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyParts<'a> {
    pub id: &'a str,
    pub raw_key: &'a str,
    pub checksum: &'a str,
}

impl<'a> ApiKeyParts<'a> {
    /// Split a key and check each segment's shape
    pub fn parse(api_key: &'a str) -> Result<Self> {
        let mut segments = api_key.split('_');
        let (Some(prefix), Some(id), Some(raw_key), Some(checksum), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid_api_key());
        };

        if prefix != API_KEY_PREFIX
            || id.len() != KEY_ID_LEN
            || raw_key.len() != RAW_KEY_LEN
            || checksum.len() != CHECKSUM_LEN
        {
            return Err(invalid_api_key());
        }

        Ok(Self { id, raw_key, checksum })
    }

    /// Username reported for requests made with this key
    pub fn username(&self) -> String {
        format!("{}_{}", API_KEY_PREFIX, self.id)
    }
}

/// Hex SHA-256 of a key's secret part, as stored in [`ApiKeyRecord::key_hash`]
pub fn hash_secret(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Checksum segment for a secret
pub fn checksum(raw_key: &str) -> String {
    let mut digest = hash_secret(raw_key);
    digest.truncate(CHECKSUM_LEN);
    digest
}

/// A freshly minted key. `api_key` is shown once; only the hash is stored.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub api_key: String,
    pub key_id: String,
    pub key_hash: String,
}

impl GeneratedApiKey {
    /// Record to store for this key
    pub fn record<I, S>(&self, roles: I) -> ApiKeyRecord
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApiKeyRecord {
            key_id: self.key_id.clone(),
            key_hash: self.key_hash.clone(),
            roles: roles.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Mint a random key
pub fn generate_api_key() -> GeneratedApiKey {
    let mut rng = rand::thread_rng();

    let mut id = [0u8; KEY_ID_LEN / 2];
    rng.fill_bytes(&mut id);
    let mut secret = [0u8; RAW_KEY_LEN / 2];
    rng.fill_bytes(&mut secret);

    let key_id = hex::encode(id);
    let raw_key = hex::encode(secret);

    GeneratedApiKey {
        api_key: format!("{}_{}_{}_{}", API_KEY_PREFIX, key_id, raw_key, checksum(&raw_key)),
        key_hash: hash_secret(&raw_key),
        key_id,
    }
}

/// Identity established by a valid key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub username: String,
    pub roles: BTreeSet<String>,
}

struct CachedRecord {
    record: Option<ApiKeyRecord>,
    expires_at: Instant,
}

/// Validates `x-api-key` values against an [`ApiKeyStore`]
pub struct ApiKeyAuthenticator {
    store: Arc<dyn ApiKeyStore>,
    records: DashMap<String, CachedRecord>,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn ApiKeyStore>) -> Self {
        Self {
            store,
            records: DashMap::new(),
        }
    }

    /// Check a key and return the identity it stands for
    pub async fn authenticate(&self, api_key: &str) -> Result<ApiKeyIdentity> {
        let parts = ApiKeyParts::parse(api_key)?;
        let record = self.record(parts.id).await?.ok_or_else(invalid_api_key)?;

        if checksum(parts.raw_key) != parts.checksum || hash_secret(parts.raw_key) != record.key_hash {
            debug!(key_id = parts.id, "API key secret did not match");
            return Err(invalid_api_key());
        }

        Ok(ApiKeyIdentity {
            username: parts.username(),
            roles: record.roles.into_iter().collect(),
        })
    }

    /// Drop the cached record for a key id
    pub fn invalidate(&self, key_id: &str) -> bool {
        self.records.remove(key_id).is_some()
    }

    async fn record(&self, key_id: &str) -> Result<Option<ApiKeyRecord>> {
        if let Some(cached) = self.records.get(key_id) {
            if Instant::now() < cached.expires_at {
                debug!(key_id, "Returning cached API key record");
                return Ok(cached.record.clone());
            }
        }

        let now_secs = get_current_timestamp();
        let record = self.store.get(key_id).await?;

        let ttl = match &record {
            None => API_KEY_CACHE_TTL,
            // Expired records are treated as absent and never cached
            Some(r) if r.is_expired(now_secs) => {
                debug!(key_id, "API key has expired");
                return Ok(None);
            }
            Some(r) => r
                .expires_at
                .map_or(API_KEY_CACHE_TTL, |at| API_KEY_CACHE_TTL.min(Duration::from_secs(at - now_secs))),
        };

        if self.records.len() >= MAX_CACHED_RECORDS {
            let now = Instant::now();
            self.records.retain(|_, cached| now < cached.expires_at);
        }

        if let Some(expires_at) = Instant::now().checked_add(ttl) {
            self.records.insert(
                key_id.to_string(),
                CachedRecord {
                    record: record.clone(),
                    expires_at,
                },
            );
        }

        Ok(record)
    }
}
