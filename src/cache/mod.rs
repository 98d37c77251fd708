//! 推荐缓存模块：网络层（Redis）优先，本地有界缓存兜底。
//!
//! # Recommendation Cache
//!
//! Two tiers behind one [`TieredCache`]:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TieredCache`] | Networked tier first, local tier when it is absent or failing |
//! | [`CacheConfig`] | TTL, local capacity, namespace and networked tier selection |
//! | [`CacheBackend`] | Async trait every tier implements |
//! | [`RedisBackend`] | Networked tier, namespaced keys with server-side expiry |
//! | [`BoundedLocalBackend`] | In-process tier, evicts by earliest expiry |
//! | [`CacheKey`] | SHA-256 digest of the normalized `(name, tag set)` |
//!
//! Cache operations never fail from the caller's point of view: networked
//! errors and timeouts are logged, counted in [`CacheStats`], and served from
//! the local tier.
//!
//! ## Example
//!
//! ```rust
//! use shelfcast::cache::{CacheConfig, TieredCache};
//! use shelfcast::types::Query;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let cache = TieredCache::local_only(CacheConfig::new().with_ttl(Duration::from_secs(60)));
//! let query = Query::new("Dune", ["sci-fi"]).unwrap();
//! cache.set(&query, "1. Hyperion", None).await;
//! assert_eq!(cache.get(&query).await.as_deref(), Some("1. Hyperion"));
//! # }
//! ```

mod backend;
mod key;
mod redis;
mod tiered;

pub use backend::{BoundedLocalBackend, CacheBackend, CacheError, CacheResult, MAX_TTL};
pub use key::{normalize_name, CacheKey, CacheKeyGenerator};
pub use redis::RedisBackend;
pub use tiered::{BackendSelection, CacheConfig, CacheStats, TieredCache};
