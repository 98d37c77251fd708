//! 上游生成提供方：单次生成与流式片段生成的统一抽象。
//!
//! # Generation Providers
//!
//! The relay and the service talk to the language model through
//! [`GenerationProvider`]: one call for a complete text, one call for a stream
//! of [`Fragment`]s. Both fail with [`UpstreamError`], which the classifier
//! turns into a [`FailureKind`](crate::error_code::FailureKind).
//!
//! | Provider | Description |
//! |----------|-------------|
//! | [`OpenAiProvider`] | OpenAI-compatible chat-completions endpoint over HTTP |
//! | [`ScriptedProvider`] | Replays queued answers; for tests and offline demos |

mod decode;
mod openai;
mod scripted;

pub use decode::SseDecoder;
pub use openai::{OpenAiProvider, ProviderConfig};
pub use scripted::ScriptedProvider;

use crate::types::Fragment;
use crate::BoxStream;
use async_trait::async_trait;

/// Failure raised by a provider, either when initiating a call or while a
/// fragment stream is being consumed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("rate limited by provider")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("upstream call timed out")]
    TimedOut,

    #[error("provider error (status {status:?}): {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },

    /// The stream broke after it was opened.
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl UpstreamError {
    pub fn provider(message: impl Into<String>) -> Self {
        UpstreamError::Provider {
            status: None,
            message: message.into(),
        }
    }
}

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Fragments in arrival order. Items after the first `Err` are never polled.
pub type FragmentStream = BoxStream<'static, UpstreamResult<Fragment>>;

/// One generation call: a system instruction plus the user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// Overrides the provider's configured output budget.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Complete text in one response. May be empty.
    async fn generate_once(&self, request: &GenerationRequest) -> UpstreamResult<String>;

    /// Open a fragment stream. Errors returned here happen before any fragment.
    async fn generate_stream(&self, request: &GenerationRequest) -> UpstreamResult<FragmentStream>;

    fn name(&self) -> &str;
}
