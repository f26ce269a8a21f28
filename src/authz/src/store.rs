//! Collaborator interfaces consumed by the resolver and verifier
//!
//! Real deployments back these with a secrets manager and a key-value table.
//! The in-memory implementations are used for embedding and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Stored role assignment for a user or a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Assigned roles; `["all"]` grants the whole catalog
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl RoleRecord {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: Some(roles.into_iter().map(Into::into).collect()),
        }
    }
}

/// Stored API key. Only a hash of the secret part is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,

    /// Hex SHA-256 of the secret part of the key
    pub key_hash: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Unix seconds after which the key is no longer accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl ApiKeyRecord {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now_secs)
    }
}

/// Secret storage (e.g. a cloud secrets manager)
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret blob by name
    async fn get_secret(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Per-user role overrides
#[async_trait]
pub trait UserRoleStore: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<RoleRecord>>;
}

/// Identity-provider group to role mapping
#[async_trait]
pub trait GroupRoleStore: Send + Sync {
    async fn get(&self, group_id: &str) -> Result<Option<RoleRecord>>;
}

/// API key records by key id
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRecord>>;
}

/// Revoked token identifiers (`uti` claim)
#[async_trait]
pub trait TokenRevocationList: Send + Sync {
    async fn is_revoked(&self, token_id: &str) -> Result<bool>;
}

/// In-memory secret store
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, name: impl Into<String>, blob: impl Into<Vec<u8>>) {
        self.secrets.write().await.insert(name.into(), blob.into());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.read().await.get(name).cloned())
    }
}

/// In-memory role store usable as either a user or a group store
///
/// Counts reads per key so callers can observe how often the backing store
/// was actually hit.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    records: Arc<RwLock<HashMap<String, RoleRecord>>>,
    reads: DashMap<String, usize>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub async fn put(&self, key: impl Into<String>, record: RoleRecord) {
        self.records.write().await.insert(key.into(), record);
    }

    /// Remove a record
    pub async fn remove(&self, key: &str) -> Option<RoleRecord> {
        self.records.write().await.remove(key)
    }

    /// Number of reads served for a key
    pub fn read_count(&self, key: &str) -> usize {
        self.reads.get(key).map(|v| *v).unwrap_or(0)
    }

    async fn read(&self, key: &str) -> Option<RoleRecord> {
        self.reads
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);

        self.records.read().await.get(key).cloned()
    }
}

#[async_trait]
impl UserRoleStore for InMemoryRoleStore {
    async fn get(&self, username: &str) -> Result<Option<RoleRecord>> {
        Ok(self.read(username).await)
    }
}

#[async_trait]
impl GroupRoleStore for InMemoryRoleStore {
    async fn get(&self, group_id: &str) -> Result<Option<RoleRecord>> {
        Ok(self.read(group_id).await)
    }
}

/// In-memory API key table
#[derive(Debug, Default)]
pub struct InMemoryApiKeyStore {
    records: RwLock<HashMap<String, ApiKeyRecord>>,
    reads: DashMap<String, usize>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, record: ApiKeyRecord) {
        self.records.write().await.insert(record.key_id.clone(), record);
    }

    pub fn read_count(&self, key_id: &str) -> usize {
        self.reads.get(key_id).map(|v| *v).unwrap_or(0)
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRecord>> {
        *self.reads.entry(key_id.to_string()).or_insert(0) += 1;
        Ok(self.records.read().await.get(key_id).cloned())
    }
}

/// In-memory revocation list
#[derive(Debug, Default)]
pub struct InMemoryRevocationList {
    revoked: RwLock<HashSet<String>>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn revoke(&self, token_id: impl Into<String>) {
        self.revoked.write().await.insert(token_id.into());
    }
}

#[async_trait]
impl TokenRevocationList for InMemoryRevocationList {
    async fn is_revoked(&self, token_id: &str) -> Result<bool> {
        Ok(self.revoked.read().await.contains(token_id))
    }
}
