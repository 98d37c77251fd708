use serde::{Deserialize, Serialize};

/// One incremental piece of generated text from an upstream stream.
///
/// Providers send frames that carry no text (role headers, finish markers);
/// those arrive as a fragment with `content: None` rather than being dropped,
/// so the relay can tell "nothing arrived" from "nothing useful arrived".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }

    pub fn empty() -> Self {
        Self { content: None }
    }

    /// Text carried by this fragment, if any. An empty string counts as none.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_no_content() {
        assert_eq!(Fragment::text("").content(), None);
        assert_eq!(Fragment::empty().content(), None);
        assert_eq!(Fragment::text("hi").content(), Some("hi"));
    }
}
