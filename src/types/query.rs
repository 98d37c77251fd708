//! Query type and tag normalization.

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorContext, Result};

/// Maximum book name length, in characters.
pub const MAX_NAME_LEN: usize = 200;
/// Maximum number of caller-supplied tags kept on a query.
pub const MAX_TAGS: usize = 20;
/// Maximum tag length, in characters; longer tags are dropped.
pub const MAX_TAG_LEN: usize = 50;

/// A recommendation request: the book someone likes, plus optional tags.
///
/// Invariants: `name` is trimmed and non-empty; `tags` are trimmed, lower-cased,
/// de-duplicated (first occurrence wins) and capped at [`MAX_TAGS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    name: String,
    tags: Vec<String>,
}

impl Query {
    pub fn new<I, S>(name: impl Into<String>, tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw = name.into();
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::validation_with_context(
                "Book name cannot be empty or only whitespace",
                ErrorContext::new().with_field_path("query.name"),
            ));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::validation_with_context(
                format!("Book name must be at most {} characters", MAX_NAME_LEN),
                ErrorContext::new().with_field_path("query.name"),
            ));
        }
        // Titles may legitimately span lines, so newline and tab are allowed.
        if name.chars().any(|c| is_c0_control(c) && c != '\n' && c != '\t') {
            return Err(Error::validation_with_context(
                "Book name contains invalid characters",
                ErrorContext::new().with_field_path("query.name"),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            tags: normalize_tags(tags),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Same book, different tag set.
    pub fn with_tags<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: self.name.clone(),
            tags: normalize_tags(tags),
        }
    }

    /// Name shortened for log lines.
    pub fn log_name(&self) -> String {
        const LOG_LEN: usize = 50;
        if self.name.chars().count() > LOG_LEN {
            let head: String = self.name.chars().take(LOG_LEN).collect();
            format!("{}...", head)
        } else {
            self.name.clone()
        }
    }
}

fn is_c0_control(c: char) -> bool {
    (c as u32) < 0x20
}

/// Trim, lower-case, drop empty / over-long / control-character tags,
/// de-duplicate keeping first occurrence, cap at [`MAX_TAGS`].
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let cleaned = tag.as_ref().trim().to_lowercase();
        if cleaned.is_empty() || cleaned.chars().count() > MAX_TAG_LEN {
            continue;
        }
        if cleaned.chars().any(is_c0_control) {
            continue;
        }
        if !out.contains(&cleaned) {
            out.push(cleaned);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Parse a provider's comma-separated tag guess: split on commas, trim,
/// lower-case, drop empties, keep at most `max` in order.
pub fn parse_tag_list(raw: &str, max: usize) -> Vec<String> {
    raw.trim()
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .take(max)
        .collect()
}
