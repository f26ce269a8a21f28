//! Effective role resolution
//!
//! Roles are merged from three independent sources into one set:
//!
//! - **Group roles**: one store lookup per claimed group, all in flight at once
//! - **App roles**: static mapping of identity-provider app roles, used only
//!   when the token carries no groups
//! - **User overrides**: per-user store lookup, always attempted
//!
//! Group and user lookups go through the shared [`DecisionCache`]; a miss reads
//! the store and caches the result, empty results included. A failing source
//! is logged and contributes nothing; it never fails the resolution.

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{cache_keys, DecisionCache, AUTH_DECISION_CACHE_TTL};
use crate::error::Result;
use crate::roles::{RoleCatalog, RoleList};
use crate::store::{GroupRoleStore, RoleRecord, UserRoleStore};
use crate::token::Principal;

/// Merges group, app-role, and user-override role sources
pub struct RoleResolver {
    cache: Arc<DecisionCache>,
    users: Arc<dyn UserRoleStore>,
    groups: Arc<dyn GroupRoleStore>,
    catalog: RoleCatalog,
    azure_role_mapping: HashMap<String, Vec<String>>,
}

impl RoleResolver {
    pub fn new(
        cache: Arc<DecisionCache>,
        users: Arc<dyn UserRoleStore>,
        groups: Arc<dyn GroupRoleStore>,
    ) -> Self {
        Self {
            cache,
            users,
            groups,
            catalog: RoleCatalog::default(),
            azure_role_mapping: HashMap::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: RoleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_azure_role_mapping(mut self, mapping: HashMap<String, Vec<String>>) -> Self {
        self.azure_role_mapping = mapping;
        self
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    /// Compute the union of every role source for a principal
    pub async fn resolve(&self, principal: &Principal) -> BTreeSet<String> {
        let (mut granted, user_roles) = futures::join!(
            self.identity_roles(principal),
            self.lookup_user_roles(&principal.username),
        );

        match user_roles {
            Ok(roles) => granted.extend(roles),
            Err(e) => warn!(
                username = %principal.username,
                error = %e,
                "Failed to get user role mapping"
            ),
        }

        granted
    }

    /// Roles contributed by group membership or, failing that, app-role claims
    async fn identity_roles(&self, principal: &Principal) -> BTreeSet<String> {
        if !principal.group_ids.is_empty() {
            return self.group_roles(&principal.group_ids).await;
        }

        self.app_roles(&principal.app_role_claims)
    }

    /// Look up every group concurrently and fold the lookups that succeeded
    async fn group_roles(&self, group_ids: &BTreeSet<String>) -> BTreeSet<String> {
        let lookups = group_ids.iter().map(|group_id| async move {
            (group_id, self.lookup_group_roles(group_id).await)
        });

        let mut granted = BTreeSet::new();
        for (group_id, outcome) in join_all(lookups).await {
            match outcome {
                Ok(roles) => granted.extend(roles),
                Err(e) => warn!(group_id = %group_id, error = %e, "Failed to get group roles"),
            }
        }

        granted
    }

    fn app_roles(&self, claimed: &BTreeSet<String>) -> BTreeSet<String> {
        claimed
            .iter()
            .filter_map(|name| self.azure_role_mapping.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    /// Roles mapped to one identity-provider group
    pub async fn lookup_group_roles(&self, group_id: &str) -> Result<Vec<String>> {
        let key = cache_keys::group_roles(group_id);
        self.cached_lookup(&key, || self.groups.get(group_id)).await
    }

    /// Role overrides assigned directly to a user
    pub async fn lookup_user_roles(&self, username: &str) -> Result<Vec<String>> {
        let key = cache_keys::user_roles(username);
        self.cached_lookup(&key, || self.users.get(username)).await
    }

    async fn cached_lookup<F, Fut>(&self, key: &str, fetch: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<RoleRecord>>>,
    {
        if let Some(roles) = self.cache.get(key) {
            debug!(key, "Returning cached auth decision");
            return Ok(roles);
        }

        let stored = fetch().await?.and_then(|record| record.roles).unwrap_or_default();
        let roles = RoleList::from_stored(stored).expand(&self.catalog);

        self.cache.set(key, roles.clone(), AUTH_DECISION_CACHE_TTL);
        debug!(key, count = roles.len(), "Cached auth decision from store");

        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRoleStore;
    use crate::token::IssuerKind;

    fn principal(username: &str, groups: &[&str], roles: &[&str]) -> Principal {
        Principal {
            username: username.to_string(),
            issuer: IssuerKind::Aad,
            group_ids: groups.iter().map(|g| g.to_string()).collect(),
            app_role_claims: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn resolver(users: Arc<InMemoryRoleStore>, groups: Arc<InMemoryRoleStore>) -> RoleResolver {
        RoleResolver::new(Arc::new(DecisionCache::new()), users, groups)
    }

    #[tokio::test]
    async fn test_absent_record_is_negatively_cached() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        let resolver = resolver(users.clone(), groups.clone());

        assert!(resolver.lookup_group_roles("g-missing").await.unwrap().is_empty());
        assert!(resolver.lookup_group_roles("g-missing").await.unwrap().is_empty());

        assert_eq!(groups.read_count("g-missing"), 1);
        assert_eq!(resolver.cache().get("grouproles-g-missing"), Some(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_are_cached_for_full_window() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        groups.put("G", RoleRecord::new(["manage:links"])).await;
        let resolver = resolver(users, groups.clone());

        resolver.lookup_group_roles("G").await.unwrap();
        tokio::time::advance(std::time::Duration::from_secs(121)).await;
        resolver.lookup_group_roles("G").await.unwrap();
        tokio::time::advance(std::time::Duration::from_secs(58)).await;
        resolver.lookup_group_roles("G").await.unwrap();
        assert_eq!(groups.read_count("G"), 1);

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        resolver.lookup_group_roles("G").await.unwrap();
        assert_eq!(groups.read_count("G"), 2);
    }

    #[tokio::test]
    async fn test_record_without_roles_is_empty() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        users.put("alice", RoleRecord { roles: None }).await;
        let resolver = resolver(users.clone(), groups);

        assert!(resolver.lookup_user_roles("alice").await.unwrap().is_empty());
        assert_eq!(resolver.cache().get("userroles-alice"), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_sentinel_is_cached_expanded() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        groups.put("G1", RoleRecord::new(["all"])).await;
        let resolver = resolver(users, groups);

        let roles = resolver.lookup_group_roles("G1").await.unwrap();
        assert_eq!(roles.len(), RoleCatalog::default().len());

        let cached = resolver.cache().get("grouproles-G1").unwrap();
        assert_eq!(cached, roles);
        assert!(!cached.iter().any(|r| r == "all"));
    }

    #[tokio::test]
    async fn test_app_roles_only_without_groups() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        groups.put("g1", RoleRecord::new(["scan:tickets"])).await;

        let mut mapping = HashMap::new();
        mapping.insert("AutonomousWriters".to_string(), vec!["manage:events".to_string()]);
        let resolver = resolver(users, groups).with_azure_role_mapping(mapping);

        let granted = resolver.resolve(&principal("a", &[], &["AutonomousWriters", "Unmapped"])).await;
        assert_eq!(granted, BTreeSet::from(["manage:events".to_string()]));

        let granted = resolver.resolve(&principal("a", &["g1"], &["AutonomousWriters"])).await;
        assert_eq!(granted, BTreeSet::from(["scan:tickets".to_string()]));
    }

    #[tokio::test]
    async fn test_user_overrides_merge_with_groups() {
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(InMemoryRoleStore::new());
        groups.put("g1", RoleRecord::new(["scan:tickets", "manage:links"])).await;
        groups.put("g2", RoleRecord::new(["manage:links"])).await;
        users.put("bob", RoleRecord::new(["admin:iam"])).await;
        let resolver = resolver(users, groups);

        let granted = resolver.resolve(&principal("bob", &["g1", "g2"], &[])).await;
        assert_eq!(
            granted,
            BTreeSet::from([
                "admin:iam".to_string(),
                "manage:links".to_string(),
                "scan:tickets".to_string(),
            ])
        );
    }
}
