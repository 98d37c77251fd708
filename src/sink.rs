//! 持久化与分析接收端：保存生成结果、记录搜索（失败只记录日志，不影响调用方）。
//!
//! Persistence and analytics sinks.
//!
//! The relay and the service hand finished recommendations and every search to
//! a [`RecommendationSink`]. Sink failures are logged and swallowed; they never
//! reach a caller.

use crate::types::Query;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Saved texts longer than this are truncated.
pub const MAX_SAVED_TEXT_CHARS: usize = 100_000;

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A generated recommendation, ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub book_name: String,
    pub tags: Vec<String>,
    pub text: String,
    pub timestamp: f64,
}

impl RecommendationRecord {
    pub fn new(query: &Query, text: impl Into<String>) -> Self {
        Self {
            book_name: query.name().to_string(),
            tags: query.tags().to_vec(),
            text: text.into(),
            timestamp: timestamp(),
        }
    }
}

/// One search, for analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub book_name: String,
    pub tags: Vec<String>,
    pub timestamp: f64,
}

impl SearchRecord {
    pub fn new(query: &Query) -> Self {
        Self {
            book_name: query.name().to_string(),
            tags: query.tags().to_vec(),
            timestamp: timestamp(),
        }
    }
}

#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn save(&self, record: RecommendationRecord) -> Result<()>;
    async fn log_search(&self, record: SearchRecord) -> Result<()>;
}

/// Save without ever failing the caller.
pub async fn save_quietly(sink: &dyn RecommendationSink, query: &Query, text: &str) {
    if let Err(e) = sink.save(RecommendationRecord::new(query, text)).await {
        warn!(error = %e, book = %query.log_name(), "failed to save recommendation");
    }
}

/// Log a search without ever failing the caller.
pub async fn log_search_quietly(sink: &dyn RecommendationSink, query: &Query) {
    if let Err(e) = sink.log_search(SearchRecord::new(query)).await {
        warn!(error = %e, book = %query.log_name(), "failed to log search");
    }
}

pub struct NoopSink;

#[async_trait]
impl RecommendationSink for NoopSink {
    async fn save(&self, _: RecommendationRecord) -> Result<()> {
        Ok(())
    }
    async fn log_search(&self, _: SearchRecord) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn RecommendationSink> {
    Arc::new(NoopSink)
}

/// A stored recommendation with how often it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecommendation {
    pub record: RecommendationRecord,
    pub request_count: u64,
}

#[derive(Default)]
struct Store {
    // Keyed by (book name, tags); tag order as given.
    recommendations: HashMap<(String, Vec<String>), StoredRecommendation>,
    searches: Vec<SearchRecord>,
}

/// In-process sink. Re-saving the same `(book, tags)` replaces the text and
/// bumps its request count.
pub struct InMemorySink {
    store: RwLock<Store>,
    max_searches: usize,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemorySink {
    pub fn new(max_searches: usize) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            max_searches: max_searches.max(1),
        }
    }

    pub fn recommendation(&self, book_name: &str, tags: &[String]) -> Option<StoredRecommendation> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .recommendations
            .get(&(book_name.to_string(), tags.to_vec()))
            .cloned()
    }

    pub fn recommendations(&self) -> Vec<StoredRecommendation> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.recommendations.values().cloned().collect()
    }

    pub fn searches(&self) -> Vec<SearchRecord> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.searches.clone()
    }

    /// Most searched book names, most frequent first, at most 100.
    pub fn popular_searches(&self, limit: usize) -> Vec<(String, usize)> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for s in &store.searches {
            *counts.entry(s.book_name.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> =
            counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit.min(100));
        ranked
    }
}

#[async_trait]
impl RecommendationSink for InMemorySink {
    async fn save(&self, mut record: RecommendationRecord) -> Result<()> {
        if record.text.chars().count() > MAX_SAVED_TEXT_CHARS {
            warn!(book = %record.book_name, "truncating saved recommendation text");
            record.text = record.text.chars().take(MAX_SAVED_TEXT_CHARS).collect();
        }
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let key = (record.book_name.clone(), record.tags.clone());
        store
            .recommendations
            .entry(key)
            .and_modify(|existing| {
                existing.request_count += 1;
                existing.record = record.clone();
            })
            .or_insert_with(|| StoredRecommendation {
                record,
                request_count: 1,
            });
        debug!("recommendation saved");
        Ok(())
    }

    async fn log_search(&self, record: SearchRecord) -> Result<()> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.searches.push(record);
        if store.searches.len() > self.max_searches {
            store.searches.remove(0);
        }
        Ok(())
    }
}
