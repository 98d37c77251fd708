//! Configuration from the environment or a YAML file.

use crate::cache::{BackendSelection, CacheConfig, MAX_TTL};
use crate::provider::ProviderConfig;
use crate::relay::RelayConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use url::Url;

/// Everything needed to wire a provider, a cache and a relay.
///
/// ```yaml
/// provider:
///   model: gpt-4o-mini
///   max_tokens: 2000
/// cache:
///   default_ttl_secs: 3600
///   networked:
///     kind: redis
///     url: redis://localhost:6379/0
/// relay:
///   pacing_ms: 10
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelfcastConfig {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub relay: RelayConfig,
}

impl ShelfcastConfig {
    /// Read the process environment.
    ///
    /// Redis is selected by default (`REDIS_URL`, or `REDIS_HOST`/`REDIS_PORT`/
    /// `REDIS_DB` with `localhost:6379/0` defaults); `CACHE_BACKEND=local`
    /// turns it off. The API key is not required here, only by
    /// [`OpenAiProvider::new`](crate::provider::OpenAiProvider::new).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.provider.api_key = var("OPENAI_API_KEY");
        if let Some(model) = var("OPENAI_MODEL") {
            config.provider.model = model;
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            config.provider.base_url = base_url;
        }
        if let Some(n) = parse_var::<u32>("OPENAI_MAX_TOKENS", var("OPENAI_MAX_TOKENS"))? {
            config.provider.max_tokens = n;
        }
        if let Some(secs) = parse_var::<f64>("OPENAI_TIMEOUT", var("OPENAI_TIMEOUT"))? {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(invalid("OPENAI_TIMEOUT", "must be a positive number of seconds"));
            }
            config.provider.timeout_secs = secs.ceil() as u64;
        }

        if let Some(ttl) = parse_var::<u64>("CACHE_DEFAULT_TTL", var("CACHE_DEFAULT_TTL"))? {
            config.cache.default_ttl_secs = ttl;
        }
        if let Some(n) = parse_var::<usize>("CACHE_MAX_SIZE", var("CACHE_MAX_SIZE"))? {
            config.cache.max_local_entries = n;
        }
        let backend = var("CACHE_BACKEND").map(|b| b.to_lowercase());
        config.cache.networked = match backend.as_deref() {
            Some("local") | Some("memory") => BackendSelection::LocalOnly,
            None | Some("redis") => BackendSelection::Redis {
                url: redis_url(&var)?,
            },
            Some(other) => {
                return Err(invalid(
                    "CACHE_BACKEND",
                    &format!("unknown backend '{}', expected 'redis' or 'local'", other),
                ))
            }
        };

        if let Some(ms) = parse_var::<u64>("SHELFCAST_PACING_MS", var("SHELFCAST_PACING_MS"))? {
            config.relay.pacing_ms = ms;
        }
        if let Some(n) = parse_var::<usize>("SHELFCAST_MAX_TAGS", var("SHELFCAST_MAX_TAGS"))? {
            config.relay.max_resolved_tags = n;
        }

        config.validate()?;
        debug!(model = %config.provider.model, backend = ?config.cache.networked, "configuration loaded from environment");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read config file: {}", e),
                ErrorContext::new().with_source(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.provider.endpoint()?;
        let ttl = self.cache.default_ttl_secs;
        if ttl == 0 || ttl > MAX_TTL.as_secs() {
            return Err(Error::configuration_with_context(
                format!("Cache TTL of {} seconds is out of range", ttl),
                ErrorContext::new()
                    .with_field_path("cache.default_ttl_secs")
                    .with_details(format!("expected 1..={} seconds", MAX_TTL.as_secs())),
            ));
        }
        if self.cache.max_local_entries == 0 {
            return Err(Error::configuration_with_context(
                "Local cache capacity must be at least 1",
                ErrorContext::new().with_field_path("cache.max_local_entries"),
            ));
        }
        if let BackendSelection::Redis { ref url } = self.cache.networked {
            let parsed = Url::parse(url).map_err(|e| {
                Error::configuration_with_context(
                    format!("Invalid Redis URL '{}': {}", url, e),
                    ErrorContext::new().with_field_path("cache.networked.url"),
                )
            })?;
            if !matches!(parsed.scheme(), "redis" | "rediss") {
                return Err(Error::configuration_with_context(
                    format!("Redis URL must use redis:// or rediss://, got '{}'", parsed.scheme()),
                    ErrorContext::new().with_field_path("cache.networked.url"),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::configuration_with_context(
        format!("Invalid value for {}: {}", name, reason),
        ErrorContext::new().with_field_path(name),
    )
}

fn parse_var<T>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| v.parse::<T>().map_err(|e| invalid(name, &format!("'{}' ({})", v, e))))
        .transpose()
}

fn redis_url(var: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    if let Some(url) = var("REDIS_URL") {
        return Ok(url);
    }
    let host = var("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = parse_var::<u16>("REDIS_PORT", var("REDIS_PORT"))?.unwrap_or(6379);
    let db = parse_var::<u32>("REDIS_DB", var("REDIS_DB"))?.unwrap_or(0);
    Ok(format!("redis://{}:{}/{}", host, port, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ShelfcastConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShelfcastConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_env_defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.provider.model, "gpt-4o-mini");
        assert_eq!(cfg.provider.max_tokens, 2000);
        assert_eq!(cfg.provider.timeout_secs, 30);
        assert!(cfg.provider.api_key.is_none());
        assert_eq!(cfg.cache.default_ttl_secs, 3600);
        assert_eq!(cfg.cache.max_local_entries, 1000);
        assert_eq!(
            cfg.cache.networked,
            BackendSelection::Redis {
                url: "redis://localhost:6379/0".into()
            }
        );
        assert_eq!(cfg.relay.pacing_ms, 10);
        assert_eq!(cfg.relay.max_resolved_tags, 10);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = from_pairs(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-5-nano"),
            ("OPENAI_TIMEOUT", "12.5"),
            ("REDIS_HOST", "cache"),
            ("REDIS_DB", "2"),
            ("CACHE_MAX_SIZE", "5"),
            ("SHELFCAST_PACING_MS", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.provider.timeout_secs, 13);
        assert_eq!(cfg.provider.token_limit_field(), "max_completion_tokens");
        assert_eq!(
            cfg.cache.networked,
            BackendSelection::Redis {
                url: "redis://cache:6379/2".into()
            }
        );
        assert_eq!(cfg.cache.max_local_entries, 5);
        assert_eq!(cfg.relay.pacing_ms, 0);
    }

    #[test]
    fn test_local_backend_selection() {
        let cfg = from_pairs(&[("CACHE_BACKEND", "local"), ("REDIS_URL", "redis://x")]).unwrap();
        assert_eq!(cfg.cache.networked, BackendSelection::LocalOnly);
        assert!(from_pairs(&[("CACHE_BACKEND", "memcached")]).is_err());
    }

    #[test]
    fn test_malformed_number_names_variable() {
        let err = from_pairs(&[("CACHE_DEFAULT_TTL", "an hour")]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("CACHE_DEFAULT_TTL"));
        assert!(from_pairs(&[("OPENAI_TIMEOUT", "-1")]).is_err());
        assert!(from_pairs(&[("REDIS_PORT", "99999")]).is_err());
    }

    #[test]
    fn test_ttl_out_of_range_rejected() {
        let err = from_pairs(&[("CACHE_DEFAULT_TTL", "18446744073709551615")]).unwrap_err();
        let context = err.context().unwrap();
        assert_eq!(context.field_path.as_deref(), Some("cache.default_ttl_secs"));
        assert!(context.details.as_deref().unwrap().contains("31536000"));
        assert!(from_pairs(&[("CACHE_DEFAULT_TTL", "0")]).is_err());
        assert!(ShelfcastConfig::from_yaml_str("cache:\n  default_ttl_secs: 99999999999\n").is_err());

        let cfg = from_pairs(&[("CACHE_DEFAULT_TTL", "31536000")]).unwrap();
        assert_eq!(cfg.cache.default_ttl(), MAX_TTL);
    }

    #[test]
    fn test_bad_urls_rejected() {
        assert!(from_pairs(&[("OPENAI_BASE_URL", "not a url")]).is_err());
        assert!(from_pairs(&[("REDIS_URL", "http://cache:6379")]).is_err());
    }

    #[test]
    fn test_yaml() {
        let cfg = ShelfcastConfig::from_yaml_str(
            "provider:\n  model: gpt-4o\ncache:\n  max_local_entries: 10\nrelay:\n  pacing_ms: 0\n",
        )
        .unwrap();
        assert_eq!(cfg.provider.model, "gpt-4o");
        assert_eq!(cfg.cache.max_local_entries, 10);
        assert_eq!(cfg.cache.networked, BackendSelection::LocalOnly);
        assert_eq!(cfg.relay.pacing(), std::time::Duration::ZERO);

        assert!(ShelfcastConfig::from_yaml_str("cache:\n  max_local_entries: 0\n").is_err());
        assert!(ShelfcastConfig::from_yaml_str("provider: [").is_err());
    }
}
