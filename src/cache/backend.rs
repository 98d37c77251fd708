//! Cache backend implementations.

use super::key::CacheKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Failure of a cache backend. Only networked backends produce these; the
/// tiered cache absorbs every one of them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend command failed: {0}")]
    Command(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Longest expiry any tier will store. Larger TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<String>>;
    async fn set(&self, key: &CacheKey, payload: &str, ttl: Duration) -> CacheResult<()>;
    async fn clear(&self) -> CacheResult<()>;
    async fn len(&self) -> CacheResult<usize>;
    fn name(&self) -> &'static str;
}

/// Payload and expiry maps. Always mutated together, under one lock.
#[derive(Default)]
struct LocalState {
    payloads: HashMap<String, String>,
    expiries: HashMap<String, Instant>,
}

impl LocalState {
    fn remove(&mut self, key: &str) {
        self.payloads.remove(key);
        self.expiries.remove(key);
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.remove(k);
        }
        expired.len()
    }

    fn earliest_expiry(&self) -> Option<String> {
        self.expiries
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(k, _)| k.clone())
    }
}

/// Bounded in-process fallback tier.
///
/// Eviction is by **earliest expiry**, not by access recency: when full, expired
/// entries are purged first and, if that frees nothing, the single entry that
/// would expire soonest is dropped. Under a uniform TTL that approximates LRU on
/// insertion order.
pub struct BoundedLocalBackend {
    state: Mutex<LocalState>,
    max_entries: usize,
}

impl BoundedLocalBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(LocalState::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read with expiry check; an expired entry is purged as a side effect.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        let mut state = self.lock();
        let expires_at = *state.expiries.get(&key.hash)?;
        if Instant::now() >= expires_at {
            state.remove(&key.hash);
            debug!(key = key.short(), "local entry expired");
            return None;
        }
        state.payloads.get(&key.hash).cloned()
    }

    /// Check, evict and insert as one critical section. Returns the key evicted
    /// for capacity, if any.
    pub fn insert(&self, key: &CacheKey, payload: &str, ttl: Duration) -> Option<String> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut evicted = None;

        let replacing = state.payloads.contains_key(&key.hash);
        if !replacing && state.payloads.len() >= self.max_entries {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!(purged, "purged expired local entries");
            }
            if state.payloads.len() >= self.max_entries {
                if let Some(oldest) = state.earliest_expiry() {
                    state.remove(&oldest);
                    debug!(evicted = %oldest.get(..8).unwrap_or(&oldest), "local cache full, evicted earliest expiry");
                    evicted = Some(oldest);
                }
            }
        }

        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        state.payloads.insert(key.hash.clone(), payload.to_string());
        state.expiries.insert(key.hash.clone(), expires_at);
        debug_assert_eq!(state.payloads.len(), state.expiries.len());
        evicted
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().payloads.contains_key(&key.hash)
    }

    pub fn entry_count(&self) -> usize {
        self.lock().payloads.len()
    }

    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.payloads.clear();
        state.expiries.clear();
    }
}

#[async_trait]
impl CacheBackend for BoundedLocalBackend {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        Ok(self.lookup(key))
    }
    async fn set(&self, key: &CacheKey, payload: &str, ttl: Duration) -> CacheResult<()> {
        self.insert(key, payload, ttl);
        Ok(())
    }
    async fn clear(&self) -> CacheResult<()> {
        self.clear_all();
        Ok(())
    }
    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entry_count())
    }
    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache = BoundedLocalBackend::new(4);
        cache.insert(&key("a"), "alpha", Duration::from_secs(10));
        assert_eq!(cache.lookup(&key("a")).as_deref(), Some("alpha"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.lookup(&key("a")), None);
        assert!(!cache.contains(&key("a")), "expired entry purged on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_earliest_expiry() {
        let cache = BoundedLocalBackend::new(3);
        cache.insert(&key("long"), "1", Duration::from_secs(300));
        cache.insert(&key("short"), "2", Duration::from_secs(30));
        cache.insert(&key("mid"), "3", Duration::from_secs(120));

        // "long" was inserted first; expiry order, not insertion order, decides.
        let evicted = cache.insert(&key("new"), "4", Duration::from_secs(60));
        assert_eq!(evicted.as_deref(), Some("short"));
        assert_eq!(cache.entry_count(), 3);
        assert!(cache.contains(&key("long")));
        assert!(cache.contains(&key("mid")));
        assert!(cache.contains(&key("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_purges_expired_before_evicting() {
        let cache = BoundedLocalBackend::new(3);
        cache.insert(&key("a"), "1", Duration::from_secs(5));
        cache.insert(&key("b"), "2", Duration::from_secs(5));
        cache.insert(&key("c"), "3", Duration::from_secs(500));
        tokio::time::advance(Duration::from_secs(6)).await;

        let evicted = cache.insert(&key("d"), "4", Duration::from_secs(50));
        assert_eq!(evicted, None);
        assert_eq!(cache.entry_count(), 2);
        assert!(cache.contains(&key("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = BoundedLocalBackend::new(2);
        cache.insert(&key("a"), "1", Duration::from_secs(5));
        cache.insert(&key("b"), "2", Duration::from_secs(50));
        assert_eq!(cache.insert(&key("a"), "1b", Duration::from_secs(5)), None);
        assert_eq!(cache.lookup(&key("a")).as_deref(), Some("1b"));
        assert_eq!(cache.entry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_clamped() {
        let cache = BoundedLocalBackend::new(2);
        assert_eq!(cache.insert(&key("a"), "1", Duration::from_secs(u64::MAX)), None);
        assert_eq!(cache.lookup(&key("a")).as_deref(), Some("1"));

        tokio::time::advance(MAX_TTL).await;
        assert_eq!(cache.lookup(&key("a")), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = BoundedLocalBackend::new(2);
        cache.set(&key("a"), "1", Duration::from_secs(5)).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
        assert_eq!(cache.name(), "local");
    }
}
