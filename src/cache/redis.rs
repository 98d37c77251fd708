//! Redis-backed networked cache tier.

use super::backend::{CacheBackend, CacheError, CacheResult};
use super::key::CacheKey;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

const SCAN_BATCH: usize = 200;

/// Networked tier. Best-effort: every command may fail, and the tiered cache
/// bounds each call with its own timeout.
///
/// Entries live under `<namespace>:<hash>` so [`CacheBackend::clear`] only
/// touches this cache's keys.
pub struct RedisBackend {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisBackend {
    /// Connect and verify with a `PING`, giving up after `timeout`.
    pub async fn connect(
        url: &str,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> CacheResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let mut conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let _: () = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let namespace = namespace.into();
        info!(namespace = %namespace, "redis cache tier connected");
        Ok(Self { conn, namespace })
    }

    /// All keys under this namespace, via cursor-based `SCAN`.
    async fn namespaced_keys(&self) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = scan_pattern(&self.namespace);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Redis key of one entry: `<namespace>:<hash>`.
pub(crate) fn entry_key(namespace: &str, key: &CacheKey) -> String {
    key.namespaced(namespace)
}

/// `SCAN MATCH` pattern covering exactly the keys of `namespace`. Glob
/// metacharacters in the namespace are escaped.
pub(crate) fn scan_pattern(namespace: &str) -> String {
    let mut pattern = String::with_capacity(namespace.len() + 2);
    for c in namespace.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

fn command_error(e: redis::RedisError) -> CacheError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Command(e.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(entry_key(&self.namespace, key))
            .await
            .map_err(command_error)
    }

    async fn set(&self, key: &CacheKey, payload: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry.
        let secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(entry_key(&self.namespace, key), payload, secs)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys = self.namespaced_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await.map_err(command_error)?;
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.namespaced_keys().await?.len())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
