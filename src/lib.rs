//! # shelfcast
//!
//! 图书推荐核心：分层缓存 + 流式中继，将单次上游生成调用转换为可增量消费的事件流。
//!
//! Book recommendation core: a tiered cache in front of an LLM provider, and a
//! streaming relay that turns one upstream generation call into a phased,
//! partial-failure-aware event stream.
//!
//! ## Overview
//!
//! A caller asks for books similar to one they like, optionally filtered by tags.
//! The answer is generated by an upstream provider, streamed back fragment by
//! fragment, and cached so identical questions are answered without a second call.
//!
//! - **Tiered Cache**: Redis first, bounded in-process fallback when Redis is down
//! - **Streaming Relay**: `tags? -> chunk* -> (done | error)` with exactly one terminal event
//! - **Single Error Vocabulary**: streaming and single-shot paths classify failures identically
//! - **Cancellation**: a dropped consumer stops the upstream stream at the next fragment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shelfcast::{Query, ShelfcastConfig, StreamingRelay, TieredCache};
//! use shelfcast::provider::OpenAiProvider;
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> shelfcast::Result<()> {
//!     let config = ShelfcastConfig::from_env()?;
//!     let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
//!     let cache = Arc::new(TieredCache::connect(config.cache.clone()).await);
//!
//!     let relay = StreamingRelay::builder(provider, cache)
//!         .config(config.relay.clone())
//!         .build();
//!
//!     let query = Query::new("The Name of the Wind", Vec::<String>::new())?;
//!     let (mut events, _cancel) = relay.stream(query);
//!     while let Some(event) = events.next().await {
//!         print!("{}", event.to_sse_frame());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Key normalizer, cache backends and the tiered cache |
//! | [`classify`] | Maps failures to safe messages and log severities |
//! | [`error_code`] | The failure vocabulary shared by every surface |
//! | [`relay`] | Streaming relay and per-request sessions |
//! | [`service`] | Single-shot recommendation service |
//! | [`provider`] | Upstream generation provider trait and implementations |
//! | [`prompt`] | Prompt builder collaborator |
//! | [`sink`] | Persistence / analytics collaborator |
//! | [`types`] | Queries, fragments and outbound events |
//! | [`config`] | Environment and YAML configuration |

pub mod cache;
pub mod classify;
pub mod config;
pub mod error_code;
pub mod prompt;
pub mod provider;
pub mod relay;
pub mod service;
pub mod sink;
pub mod tags;
pub mod types;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheKey, CacheStats, TieredCache};
pub use classify::{classify, Classification, Severity};
pub use config::ShelfcastConfig;
pub use error_code::FailureKind;
pub use relay::{CancelHandle, RelayConfig, RelayStream, StreamingRelay};
pub use service::{Recommendation, RecommendationService, ServiceError};
pub use types::{Fragment, OutboundEvent, Query};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
