//! Tag resolution: ask the provider what a book is about.

use crate::prompt::PromptBuilder;
use crate::provider::{GenerationProvider, UpstreamResult};
use crate::types::parse_tag_list;
use std::sync::Arc;
use tracing::{debug, info};

/// Output budget for the tag call; a comma list never needs more.
pub const DEFAULT_TAGS_MAX_TOKENS: u32 = 150;
/// Resolved tags kept, in provider order.
pub const DEFAULT_MAX_RESOLVED_TAGS: usize = 10;

#[derive(Clone)]
pub struct TagResolver {
    provider: Arc<dyn GenerationProvider>,
    prompts: Arc<dyn PromptBuilder>,
    max_tags: usize,
    max_tokens: u32,
}

impl TagResolver {
    pub fn new(provider: Arc<dyn GenerationProvider>, prompts: Arc<dyn PromptBuilder>) -> Self {
        Self {
            provider,
            prompts,
            max_tags: DEFAULT_MAX_RESOLVED_TAGS,
            max_tokens: DEFAULT_TAGS_MAX_TOKENS,
        }
    }

    pub fn max_tags(mut self, max_tags: usize) -> Self {
        self.max_tags = max_tags;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// One `generate_once` call, parsed as a comma list. An empty answer
    /// yields an empty list, not an error.
    pub async fn resolve(&self, name: &str) -> UpstreamResult<Vec<String>> {
        let request = self.prompts.tags_prompt(name).max_tokens(self.max_tokens);
        let raw = self.provider.generate_once(&request).await?;
        let tags = parse_tag_list(&raw, self.max_tags);
        if tags.is_empty() {
            debug!("provider returned no usable tags");
        } else {
            info!(count = tags.len(), "resolved tags");
        }
        Ok(tags)
    }
}
