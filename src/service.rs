//! Single-shot recommendation service.

use crate::cache::TieredCache;
use crate::classify::{classify, classify_logged, Classification};
use crate::error_code::FailureKind;
use crate::prompt::{DefaultPromptBuilder, PromptBuilder};
use crate::provider::GenerationProvider;
use crate::sink::{log_search_quietly, noop_sink, save_quietly, RecommendationSink};
use crate::tags::TagResolver;
use crate::types::Query;
use crate::Error;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub query: Query,
    pub text: String,
    pub from_cache: bool,
}

/// A classified failure, ready to be answered with.
///
/// `message` is always the safe message of `kind`; raw upstream text only
/// reaches the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub status: u16,
    pub kind: FailureKind,
    pub message: String,
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status_class(&self) -> &'static str {
        self.kind.status_class()
    }

    /// Classify any crate error.
    pub fn from_error(error: &Error) -> Self {
        classify(error).into()
    }
}

impl From<Classification> for ServiceError {
    fn from(c: Classification) -> Self {
        Self {
            status: c.kind.http_status(),
            kind: c.kind,
            message: c.safe_message,
        }
    }
}

pub struct RecommendationService {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<TieredCache>,
    prompts: Arc<dyn PromptBuilder>,
    sink: Arc<dyn RecommendationSink>,
    tags: TagResolver,
}

impl RecommendationService {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<TieredCache>) -> Self {
        let prompts: Arc<dyn PromptBuilder> = Arc::new(DefaultPromptBuilder);
        Self {
            tags: TagResolver::new(provider.clone(), prompts.clone()),
            provider,
            cache,
            prompts,
            sink: noop_sink(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.tags = TagResolver::new(self.provider.clone(), prompts.clone());
        self.prompts = prompts;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecommendationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_tag_resolver(mut self, tags: TagResolver) -> Self {
        self.tags = tags;
        self
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    #[instrument(name = "recommend", skip_all, fields(book = %query.log_name(), tags = query.tags().len()))]
    pub async fn recommend(&self, query: &Query) -> Result<Recommendation, ServiceError> {
        log_search_quietly(self.sink.as_ref(), query).await;

        if let Some(text) = self.cache.get(query).await {
            info!(chars = text.len(), "serving cached recommendation");
            return Ok(Recommendation {
                query: query.clone(),
                text,
                from_cache: true,
            });
        }

        let request = self.prompts.recommendation_prompt(query);
        let text = match self.provider.generate_once(&request).await {
            Ok(text) => text,
            Err(e) => return Err(classify_logged(&Error::from(e), "generate_once").into()),
        };

        if text.trim().is_empty() {
            let err = Error::generation(FailureKind::EmptyGeneration, "completion had no content");
            return Err(classify_logged(&err, "complete").into());
        }

        self.cache.set(query, &text, None).await;
        save_quietly(self.sink.as_ref(), query, &text).await;
        info!(chars = text.len(), "recommendation generated");
        Ok(Recommendation {
            query: query.clone(),
            text,
            from_cache: false,
        })
    }

    /// Tags for a book or author. Never fails: any error yields an empty list.
    #[instrument(name = "tags", skip_all)]
    pub async fn tags(&self, name: &str) -> Vec<String> {
        if name.trim().is_empty() {
            return Vec::new();
        }
        match self.tags.resolve(name.trim()).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "tag resolution failed, returning no tags");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_kind() {
        let status = |k| ServiceError::from(Classification::for_kind(k)).status;
        assert_eq!(status(FailureKind::RateLimited), 429);
        assert_eq!(status(FailureKind::TimedOut), 504);
        assert_eq!(status(FailureKind::ProviderError), 502);
        assert_eq!(status(FailureKind::EmptyGeneration), 502);
        assert_eq!(status(FailureKind::Unknown), 500);
    }

    #[test]
    fn test_from_error_hides_detail() {
        let err = ServiceError::from_error(&Error::runtime("db path /var/secret"));
        assert_eq!(err.kind, FailureKind::Unknown);
        assert!(!err.message.contains("secret"));
        assert_eq!(err.to_string(), err.message);
    }
}
