//! Prompt assembly for recommendation and tag-resolution calls.

use crate::provider::GenerationRequest;
use crate::types::Query;

/// System instruction for the main recommendation call.
pub const RECOMMENDATION_SYSTEM: &str = "You are a book recommendation assistant. Each request \
is independent: you have no memory of previous requests. When quoting a book blurb, copy the \
official Goodreads blurb exactly or write 'Blurb not available'; never write one yourself.";

/// System instruction for tag resolution.
pub const TAGS_SYSTEM: &str =
    "You are a helpful assistant that identifies book genres, themes, and characteristics.";

/// Escape double quotes, fold newlines into spaces and drop carriage returns.
pub fn sanitize_for_prompt(text: &str) -> String {
    text.replace('"', "\\\"").replace('\n', " ").replace('\r', "")
}

/// Builds the two prompts a recommendation needs. Pure, no I/O.
pub trait PromptBuilder: Send + Sync {
    fn recommendation_prompt(&self, query: &Query) -> GenerationRequest;
    fn tags_prompt(&self, name: &str) -> GenerationRequest;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn recommendation_prompt(&self, query: &Query) -> GenerationRequest {
        let name = sanitize_for_prompt(query.name());
        let mut prompt = format!(
            "Sorted by a combination of their Goodreads and Amazon ratings, recommend 5-8 books \
             that someone who likes \"{}\" would enjoy.",
            name
        );
        if query.has_tags() {
            let tags: Vec<String> = query.tags().iter().map(|t| sanitize_for_prompt(t)).collect();
            prompt.push_str(&format!(
                "\n\nIMPORTANT: Only recommend books that match ALL of the following tags/genres: {}.",
                tags.join(", ")
            ));
        }
        prompt.push_str(
            "\n\nFor each book give, as a numbered list in plain text without markdown:\n\
             1. Title by Author\n   \
             - Goodreads: X.XX/5★ | Amazon: X.XX/5★\n   \
             - One or two sentences on why it is recommended\n   \
             Blurb: the exact official Goodreads blurb, or \"Blurb not available\"",
        );
        GenerationRequest::new(RECOMMENDATION_SYSTEM, prompt)
    }

    fn tags_prompt(&self, name: &str) -> GenerationRequest {
        let prompt = format!(
            "Given the book or author \"{}\", provide a list of 5-10 relevant tags that describe \
             its genre, themes, or characteristics (for example: romance, fantasy, mafia, \
             coming-of-age, enemies-to-lovers).\n\n\
             Return ONLY a comma-separated list of tags. Do not include any explanation or formatting.",
            sanitize_for_prompt(name)
        );
        GenerationRequest::new(TAGS_SYSTEM, prompt)
    }
}
