//! OpenAI-compatible chat-completions provider.

use super::decode::SseDecoder;
use super::{FragmentStream, GenerationProvider, GenerationRequest, UpstreamError, UpstreamResult};
use crate::types::Fragment;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Connection settings for [`OpenAiProvider`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 2000,
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// `<base_url>/chat/completions`, validated.
    pub fn endpoint(&self) -> Result<Url> {
        let raw = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let url = Url::parse(&raw).map_err(|e| {
            Error::configuration_with_context(
                format!("Invalid provider base URL '{}': {}", self.base_url, e),
                ErrorContext::new().with_field_path("provider.base_url"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                format!("Provider base URL must be http or https, got '{}'", url.scheme()),
                ErrorContext::new().with_field_path("provider.base_url"),
            ));
        }
        Ok(url)
    }

    /// gpt-5 family models reject `max_tokens` and expect `max_completion_tokens`.
    pub fn token_limit_field(&self) -> &'static str {
        if self.model.contains("gpt-5") {
            "max_completion_tokens"
        } else {
            "max_tokens"
        }
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::configuration_with_context(
                    "OPENAI_API_KEY is not set",
                    ErrorContext::new().with_field_path("provider.api_key"),
                )
            })?;
        let endpoint = config.endpoint()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("Failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("OpenAiProvider::new"),
                )
            })?;

        info!(model = %config.model, endpoint = %endpoint, "openai provider ready");
        Ok(Self {
            client,
            endpoint,
            api_key,
            config: config.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "stream": stream,
        });
        let limit = request.max_tokens.unwrap_or(self.config.max_tokens);
        body[self.config.token_limit_field()] = json!(limit);
        body
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> UpstreamResult<reqwest::Response> {
        let accept = if stream { "text/event-stream" } else { "application/json" };
        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header(ACCEPT, accept)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after_ms = retry_after_ms(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "provider rejected request");
        Err(status_error(status, retry_after_ms, &body))
    }
}

fn request_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::TimedOut
    } else {
        UpstreamError::Provider {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// `Retry-After: <seconds>` only.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let secs: u64 = headers.get("retry-after")?.to_str().ok()?.trim().parse().ok()?;
    Some(secs.saturating_mul(1000))
}

fn status_error(status: StatusCode, retry_after_ms: Option<u64>, body: &str) -> UpstreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited { retry_after_ms },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => UpstreamError::TimedOut,
        _ => UpstreamError::Provider {
            status: Some(status.as_u16()),
            message: error_message(body).unwrap_or_else(|| body.chars().take(200).collect()),
        },
    }
}

/// `error.message` from an OpenAI-style error body.
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/message")?.as_str().map(str::to_string)
}

/// Every frame becomes a fragment, even one with no choices; an error frame
/// breaks the stream.
fn fragment_from_frame(frame: &Value) -> UpstreamResult<Fragment> {
    if let Some(err) = frame.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider sent an error frame");
        return Err(UpstreamError::Stream(message.to_string()));
    }
    let content = frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Fragment { content })
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate_once(&self, request: &GenerationRequest) -> UpstreamResult<String> {
        let resp = self.send(request, false).await?;
        let body: Value = resp.json().await.map_err(|e| UpstreamError::Provider {
            status: None,
            message: format!("invalid completion body: {}", e),
        })?;
        Ok(body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> UpstreamResult<FragmentStream> {
        let resp = self.send(request, true).await?;
        let bytes = resp
            .bytes_stream()
            .map_err(|e| UpstreamError::Stream(e.to_string()));
        let frames = SseDecoder::new().decode(Box::pin(bytes));
        Ok(Box::pin(frames.map(|item| item.and_then(|frame| fragment_from_frame(&frame)))))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let err = OpenAiProvider::new(&ProviderConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let cfg = ProviderConfig::new("k").with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            cfg.endpoint().unwrap().as_str(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert!(ProviderConfig::new("k").with_base_url("ftp://x").endpoint().is_err());
        assert!(ProviderConfig::new("k").with_base_url("not a url").endpoint().is_err());
    }

    #[test]
    fn test_token_limit_field_by_model_family() {
        let cfg = ProviderConfig::new("k");
        assert_eq!(cfg.token_limit_field(), "max_tokens");
        assert_eq!(cfg.with_model("gpt-5-mini").token_limit_field(), "max_completion_tokens");
    }

    #[test]
    fn test_request_body() {
        let provider = OpenAiProvider::new(&ProviderConfig::new("k")).unwrap();
        let body = provider.body(&GenerationRequest::new("sys", "hi").max_tokens(150), true);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["max_tokens"], json!(150));
        assert_eq!(body["messages"][1]["content"], json!("hi"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(2000), ""),
            UpstreamError::RateLimited { retry_after_ms: Some(2000) }
        );
        assert_eq!(status_error(StatusCode::GATEWAY_TIMEOUT, None, ""), UpstreamError::TimedOut);
        assert_eq!(
            status_error(
                StatusCode::NOT_FOUND,
                None,
                r#"{"error":{"message":"model not found"}}"#
            ),
            UpstreamError::Provider {
                status: Some(404),
                message: "model not found".into()
            }
        );
    }

    #[test]
    fn test_fragment_from_frame() {
        let f = fragment_from_frame(&json!({"choices":[{"delta":{"content":"Hi"}}]})).unwrap();
        assert_eq!(f.content(), Some("Hi"));
        let role_only = fragment_from_frame(&json!({"choices":[{"delta":{"role":"assistant"}}]})).unwrap();
        assert_eq!(role_only.content(), None);
        assert!(fragment_from_frame(&json!({"error":{"message":"overloaded"}})).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", ProviderConfig::new("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
    }
}
