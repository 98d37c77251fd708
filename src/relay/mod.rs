//! 流式中继：将一次上游流式生成转换为分阶段的出站事件流（标签 → 片段 → 完成/错误）。
//!
//! # Streaming Relay
//!
//! [`StreamingRelay::stream`] spawns one session per query and hands back a
//! [`RelayStream`] of [`OutboundEvent`]s:
//!
//! ```text
//! Tags?  ->  Chunk*  ->  (Done | Error)
//! ```
//!
//! | Phase | What happens |
//! |-------|--------------|
//! | Start | search logged, cache consulted; a hit ends the session with `Done` |
//! | ResolvingTags | only when the query has no tags; failures are logged and skipped |
//! | Generating | upstream stream opened, each fragment with text becomes a `Chunk` |
//! | Done / Failed | exactly one terminal event; success is cached and saved |
//!
//! Dropping the [`RelayStream`] or calling [`CancelHandle::cancel`] stops the
//! session at its next suspension point and drops the upstream stream.

mod cancel;
mod session;

pub use cancel::CancelHandle;
pub use session::{Phase, StreamSession};

use crate::cache::TieredCache;
use crate::prompt::{DefaultPromptBuilder, PromptBuilder};
use crate::provider::GenerationProvider;
use crate::sink::{noop_sink, RecommendationSink};
use crate::tags::{TagResolver, DEFAULT_MAX_RESOLVED_TAGS, DEFAULT_TAGS_MAX_TOKENS};
use crate::types::{OutboundEvent, Query};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Delay after each emitted chunk.
    pub pacing_ms: u64,
    pub max_resolved_tags: usize,
    pub tags_max_tokens: u32,
    /// Outbound events buffered before the session waits for the consumer.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 10,
            max_resolved_tags: DEFAULT_MAX_RESOLVED_TAGS,
            tags_max_tokens: DEFAULT_TAGS_MAX_TOKENS,
            channel_capacity: 32,
        }
    }
}

impl RelayConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing_ms = u64::try_from(pacing.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Collaborators shared by every session of one relay.
pub(crate) struct RelayShared {
    pub(crate) provider: Arc<dyn GenerationProvider>,
    pub(crate) cache: Arc<TieredCache>,
    pub(crate) prompts: Arc<dyn PromptBuilder>,
    pub(crate) sink: Arc<dyn RecommendationSink>,
    pub(crate) tags: TagResolver,
    pub(crate) config: RelayConfig,
}

#[derive(Clone)]
pub struct StreamingRelay {
    shared: Arc<RelayShared>,
}

pub struct StreamingRelayBuilder {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<TieredCache>,
    prompts: Arc<dyn PromptBuilder>,
    sink: Arc<dyn RecommendationSink>,
    config: RelayConfig,
}

impl StreamingRelayBuilder {
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecommendationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> StreamingRelay {
        let tags = TagResolver::new(self.provider.clone(), self.prompts.clone())
            .max_tags(self.config.max_resolved_tags)
            .max_tokens(self.config.tags_max_tokens);
        StreamingRelay {
            shared: Arc::new(RelayShared {
                provider: self.provider,
                cache: self.cache,
                prompts: self.prompts,
                sink: self.sink,
                tags,
                config: self.config,
            }),
        }
    }
}

impl StreamingRelay {
    pub fn builder(
        provider: Arc<dyn GenerationProvider>,
        cache: Arc<TieredCache>,
    ) -> StreamingRelayBuilder {
        StreamingRelayBuilder {
            provider,
            cache,
            prompts: Arc::new(DefaultPromptBuilder),
            sink: noop_sink(),
            config: RelayConfig::default(),
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.shared.cache
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Start a session for `query`. Must be called inside a tokio runtime.
    pub fn stream(&self, query: Query) -> (RelayStream, CancelHandle) {
        let (tx, rx) = mpsc::channel(self.shared.config.channel_capacity.max(1));
        let cancel = CancelHandle::new();
        let id = uuid::Uuid::new_v4().to_string();
        let session = StreamSession::new(id.clone(), query, tx, cancel.token());
        tokio::spawn(session.run(self.shared.clone()));
        (
            RelayStream {
                rx,
                cancel: cancel.clone(),
                session_id: id,
            },
            cancel,
        )
    }
}

/// Outbound events of one session. Ends after the terminal event.
///
/// Dropping it cancels the session.
pub struct RelayStream {
    rx: mpsc::Receiver<OutboundEvent>,
    cancel: CancelHandle,
    session_id: String,
}

impl RelayStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Events as `data: <json>\n\n` frames.
    pub fn into_sse(self) -> impl Stream<Item = Bytes> + Send + 'static {
        self.map(|event| event.to_bytes())
    }
}

impl Stream for RelayStream {
    type Item = OutboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
