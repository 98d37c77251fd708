//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::Query;

/// Fixed-width (SHA-256, 64 hex chars) digest of a normalized `(name, tag set)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
    /// First 8 chars, for log lines.
    pub fn short(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
    /// `"<prefix>:<hash>"`
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.hash)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lower-cased, trimmed book name as it enters the key.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Derives [`CacheKey`]s. Same name and same tag *set* always give the same key,
/// whatever the input order, casing or surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate<S: AsRef<str>>(&self, name: &str, tags: &[S]) -> CacheKey {
        let mut tags: Vec<String> = tags
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();

        let mut parts: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        parts.insert("name", normalize_name(name).into());
        parts.insert("tags", tags.into());
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone().into());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
    }

    pub fn for_query(&self, query: &Query) -> CacheKey {
        self.generate(query.name(), query.tags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_case_invariant() {
        let g = CacheKeyGenerator::new();
        let a = g.generate("Dune", &["Sci-Fi", "classics"]);
        let b = g.generate("  dune ", &["CLASSICS ", "sci-fi", "Sci-Fi"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_empty_tag_set_is_distinct() {
        let g = CacheKeyGenerator::new();
        let none: [&str; 0] = [];
        assert_ne!(g.generate("Dune", &none), g.generate("Dune", &["sci-fi"]));
        assert_eq!(g.generate("Dune", &none), g.generate("Dune", &["", "  "]));
    }

    #[test]
    fn test_tag_boundaries_do_not_collide() {
        let g = CacheKeyGenerator::new();
        assert_ne!(g.generate("a", &["b,c"]), g.generate("a", &["b", "c"]));
    }

    #[test]
    fn test_salt_changes_key() {
        let plain = CacheKeyGenerator::new().generate("Dune", &["x"]);
        let salted = CacheKeyGenerator::new()
            .with_salt("v2")
            .generate("Dune", &["x"]);
        assert_ne!(plain, salted);
    }

    #[test]
    fn test_namespaced_and_short() {
        let key = CacheKey::new("0123456789abcdef");
        assert_eq!(key.namespaced("recommendations"), "recommendations:0123456789abcdef");
        assert_eq!(key.short(), "01234567");
    }
}
