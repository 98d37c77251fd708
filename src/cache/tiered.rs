//! Tiered cache: networked tier first, bounded local tier as fallback.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{BoundedLocalBackend, CacheBackend, CacheError, CacheResult, MAX_TTL};
use super::key::{CacheKey, CacheKeyGenerator};
use super::redis::RedisBackend;
use crate::types::Query;

/// Which networked tier to use. Resolved once, at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSelection {
    #[default]
    LocalOnly,
    Redis {
        url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub max_local_entries: usize,
    pub namespace: String,
    pub networked: BackendSelection,
    /// Upper bound for every networked call, connect included.
    pub networked_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_local_entries: 1000,
            namespace: "recommendations".to_string(),
            networked: BackendSelection::LocalOnly,
            networked_timeout_ms: 1000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    /// Sub-second remainders round up, so a TTL never truncates to zero.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = whole_secs_rounded_up(ttl);
        self
    }
    pub fn with_max_local_entries(mut self, n: usize) -> Self {
        self.max_local_entries = n;
        self
    }
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
    pub fn with_redis(mut self, url: impl Into<String>) -> Self {
        self.networked = BackendSelection::Redis { url: url.into() };
        self
    }
    pub fn with_networked_timeout(mut self, timeout: Duration) -> Self {
        self.networked_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
    pub fn networked_timeout(&self) -> Duration {
        Duration::from_millis(self.networked_timeout_ms)
    }
}

fn whole_secs_rounded_up(ttl: Duration) -> u64 {
    let extra = u64::from(ttl.subsec_nanos() > 0);
    ttl.as_secs().saturating_add(extra)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub local_size: usize,
    pub networked_available: bool,
    /// `None` without a networked tier; `Some(0)` when counting failed.
    pub networked_size: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub networked_errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    networked_errors: AtomicU64,
}
impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            networked_errors: AtomicU64::new(0),
        }
    }
}

/// Cache in front of the recommendation provider.
///
/// The networked tier is preferred and never allowed to fail a call: every
/// error or timeout is logged, counted, and answered from the local tier.
pub struct TieredCache {
    config: CacheConfig,
    keys: CacheKeyGenerator,
    networked: Option<Arc<dyn CacheBackend>>,
    local: BoundedLocalBackend,
    stats: AtomicStats,
}

impl TieredCache {
    pub fn local_only(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_networked(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: CacheConfig, networked: Option<Arc<dyn CacheBackend>>) -> Self {
        let local = BoundedLocalBackend::new(config.max_local_entries);
        Self {
            config,
            keys: CacheKeyGenerator::new(),
            networked,
            local,
            stats: AtomicStats::new(),
        }
    }

    /// Resolve [`CacheConfig::networked`] once. An unreachable Redis leaves the
    /// cache local-only for its whole lifetime.
    pub async fn connect(config: CacheConfig) -> Self {
        match config.networked.clone() {
            BackendSelection::LocalOnly => {
                info!("cache running local-only");
                Self::local_only(config)
            }
            BackendSelection::Redis { url } => {
                match RedisBackend::connect(&url, &config.namespace, config.networked_timeout())
                    .await
                {
                    Ok(backend) => Self::with_networked(config, Arc::new(backend)),
                    Err(e) => {
                        info!(error = %e, "redis not available, using in-memory cache");
                        Self::local_only(config)
                    }
                }
            }
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn networked_available(&self) -> bool {
        self.networked.is_some()
    }

    pub fn local(&self) -> &BoundedLocalBackend {
        &self.local
    }

    pub fn key_for(&self, query: &Query) -> CacheKey {
        self.keys.for_query(query)
    }

    async fn bounded<T, F>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let limit = self.config.networked_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(CacheError::Timeout(limit)),
        }
    }

    fn networked_failed(&self, op: &'static str, key: Option<&CacheKey>, e: &CacheError) {
        self.stats.networked_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            op,
            key = key.map(|k| k.short()).unwrap_or("*"),
            error = %e,
            "networked cache tier failed, falling back to local"
        );
    }

    fn record(&self, hit: bool) {
        if hit {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn get(&self, query: &Query) -> Option<String> {
        let key = self.key_for(query);

        if let Some(ref net) = self.networked {
            match self.bounded(net.get(&key)).await {
                Ok(found) => {
                    debug!(key = key.short(), tier = net.name(), hit = found.is_some(), "cache lookup");
                    self.record(found.is_some());
                    return found;
                }
                Err(e) => self.networked_failed("get", Some(&key), &e),
            }
        }

        let found = self.local.lookup(&key);
        debug!(key = key.short(), tier = "local", hit = found.is_some(), "cache lookup");
        self.record(found.is_some());
        found
    }

    /// Store `payload`; `ttl` defaults to [`CacheConfig::default_ttl`] and is
    /// clamped to [`MAX_TTL`].
    pub async fn set(&self, query: &Query, payload: &str, ttl: Option<Duration>) {
        let key = self.key_for(query);
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl()).min(MAX_TTL);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(ref net) = self.networked {
            match self.bounded(net.set(&key, payload, ttl)).await {
                Ok(()) => {
                    debug!(key = key.short(), tier = net.name(), ttl_secs = ttl.as_secs(), "cached");
                    return;
                }
                Err(e) => self.networked_failed("set", Some(&key), &e),
            }
        }

        self.local.insert(&key, payload, ttl);
        debug!(key = key.short(), tier = "local", ttl_secs = ttl.as_secs(), "cached");
    }

    /// Best-effort clear of the networked namespace, then unconditional local clear.
    pub async fn clear(&self) {
        if let Some(ref net) = self.networked {
            match self.bounded(net.clear()).await {
                Ok(()) => info!(tier = net.name(), "networked cache cleared"),
                Err(e) => self.networked_failed("clear", None, &e),
            }
        }
        self.local.clear_all();
        info!("local cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        let networked_size = match self.networked {
            Some(ref net) => match self.bounded(net.len()).await {
                Ok(n) => Some(n),
                Err(e) => {
                    self.networked_failed("len", None, &e);
                    Some(0)
                }
            },
            None => None,
        };
        CacheStats {
            local_size: self.local.entry_count(),
            networked_available: self.networked_available(),
            networked_size,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            networked_errors: self.stats.networked_errors.load(Ordering::Relaxed),
        }
    }
}
