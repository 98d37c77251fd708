//! 失败类型词汇表：流式与单次推荐路径共享的失败分类及其安全提示语。
//!
//! Failure vocabulary shared by the streaming relay and the single-shot service.
//!
//! Both surfaces present the same set of failures to callers. Each kind carries
//! a stable code, a status classification, a default log severity and the one
//! safe message a caller is allowed to see.
//!
//! ## Failure Kinds
//!
//! | Code  | Kind                 | Status class     | Surfaced |
//! |-------|----------------------|------------------|----------|
//! | E2001 | `RateLimited`        | `rate_limited`   | yes      |
//! | E3001 | `ProviderError`      | `upstream_error` | yes      |
//! | E3003 | `TimedOut`           | `timeout`        | yes      |
//! | E3101 | `TransportFault`     | `upstream_error` | yes      |
//! | E3201 | `EmptyGeneration`    | `upstream_error` | yes      |
//! | E3202 | `NoFragments`        | `upstream_error` | yes      |
//! | E4101 | `BackendUnavailable` | `internal`       | never    |
//! | E9999 | `Unknown`            | `internal`       | yes      |
//!
//! ## Example
//!
//! ```rust
//! use shelfcast::error_code::FailureKind;
//!
//! let kind = FailureKind::RateLimited;
//! assert_eq!(kind.code(), "E2001");
//! assert_eq!(kind.http_status(), 429);
//! assert_eq!(kind.status_class(), "rate_limited");
//! ```

use serde::{Serialize, Serializer};
use std::fmt;

use crate::classify::Severity;

/// A classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// E2001: Provider rejected the call for exceeding its rate limit
    RateLimited,
    /// E3003: Upstream call did not answer in time
    TimedOut,
    /// E3001: Any other failure raised when initiating an upstream call
    ProviderError,
    /// E3101: The fragment stream broke after it had been opened
    TransportFault,
    /// E3201: Fragments arrived but none of them carried text
    EmptyGeneration,
    /// E3202: The stream ended without a single fragment
    NoFragments,
    /// E4101: Networked cache tier failed; absorbed by the local tier
    BackendUnavailable,
    /// E9999: Error could not be classified
    Unknown,
}

impl FailureKind {
    /// Returns the stable code string (e.g., `"E2001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "E2001",
            Self::ProviderError => "E3001",
            Self::TimedOut => "E3003",
            Self::TransportFault => "E3101",
            Self::EmptyGeneration => "E3201",
            Self::NoFragments => "E3202",
            Self::BackendUnavailable => "E4101",
            Self::Unknown => "E9999",
        }
    }

    /// Returns the snake_case name (e.g., `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::TimedOut => "timeout",
            Self::ProviderError => "provider_error",
            Self::TransportFault => "transport_fault",
            Self::EmptyGeneration => "empty_generation",
            Self::NoFragments => "no_fragments",
            Self::BackendUnavailable => "backend_unavailable",
            Self::Unknown => "unknown",
        }
    }

    /// Coarse status classification for single-shot callers:
    /// `"rate_limited"`, `"timeout"`, `"upstream_error"` or `"internal"`.
    #[inline]
    pub fn status_class(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::TimedOut => "timeout",
            Self::ProviderError
            | Self::TransportFault
            | Self::EmptyGeneration
            | Self::NoFragments => "upstream_error",
            Self::BackendUnavailable | Self::Unknown => "internal",
        }
    }

    /// HTTP status a transport layer should answer with.
    #[inline]
    pub fn http_status(&self) -> u16 {
        match self.status_class() {
            "rate_limited" => 429,
            "timeout" => 504,
            "upstream_error" => 502,
            _ => 500,
        }
    }

    /// Default log severity.
    ///
    /// Rate limiting is expected back-pressure and backend faults are recovered
    /// locally, so both log as warnings.
    #[inline]
    pub fn severity(&self) -> Severity {
        match self {
            Self::RateLimited | Self::BackendUnavailable => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Whether a caller may ever see this kind.
    #[inline]
    pub fn is_surfaced(&self) -> bool {
        !matches!(self, Self::BackendUnavailable)
    }

    /// The only text a caller is shown for this kind. Never contains raw fault detail.
    pub fn safe_message(&self) -> &'static str {
        match self {
            Self::RateLimited => "API rate limit exceeded. Please try again later.",
            Self::TimedOut => "Request timed out. Please try again.",
            Self::ProviderError => {
                "Error communicating with recommendation service. Please try again later."
            }
            Self::TransportFault => {
                "The recommendation stream was interrupted. Please try again."
            }
            Self::EmptyGeneration => {
                "The recommendation service returned an empty response. Please try again."
            }
            Self::NoFragments => {
                "No response was received from the recommendation service. The configured model may be unavailable or may not support streaming."
            }
            Self::BackendUnavailable | Self::Unknown => {
                "An unexpected error occurred. Please try again later."
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for FailureKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
