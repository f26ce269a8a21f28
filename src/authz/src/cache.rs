//! Process-wide TTL decision cache with a background sweeper

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// TTL applied to every role lookup cached by the resolver
pub const AUTH_DECISION_CACHE_TTL: Duration = Duration::from_secs(180);

/// Default interval between proactive sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Cache key scheme shared with role mutation handlers
pub mod cache_keys {
    /// Key for a user's role overrides
    pub fn user_roles(username: &str) -> String {
        format!("userroles-{}", username)
    }

    /// Key for a group's role mapping
    pub fn group_roles(group_id: &str) -> String {
        format!("grouproles-{}", group_id)
    }
}

/// Cached entry with its own expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<String>,
    /// `None` when the deadline is past what the clock can represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<String>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// Shared in-memory TTL cache
///
/// Provides:
/// - Thread-safe get/set/del backed by DashMap
/// - Lazy eviction on read
/// - Proactive eviction through [`DecisionCache::spawn_sweeper`]
///
/// Construct one instance at process start and share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live value
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                // Only drop it if nobody refreshed the entry in between
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value, overwriting any previous entry
    ///
    /// The resolver always passes [`AUTH_DECISION_CACHE_TTL`].
    pub fn set(&self, key: impl Into<String>, value: Vec<String>, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Delete an entry. Returns whether one was present.
    pub fn del(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop a user's cached role overrides
    pub fn invalidate_user_roles(&self, username: &str) -> bool {
        self.del(&cache_keys::user_roles(username))
    }

    /// Drop a group's cached role mapping
    pub fn invalidate_group_roles(&self, group_id: &str) -> bool {
        self.del(&cache_keys::group_roles(group_id))
    }

    /// Evict every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.expirations.fetch_add(removed, Ordering::Relaxed);
        }

        removed
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Start the background sweep loop
    ///
    /// Must be called from within a Tokio runtime. The loop runs until
    /// [`SweeperHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let cache = Arc::clone(self);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            token,
            handle: Some(handle),
        }
    }
}

/// Owner of the background sweep task
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep loop and wait for it to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
