//! Error classification logic

use crate::error_code::FailureKind;
use crate::provider::UpstreamError;
use crate::Error;
use std::fmt;

/// Log severity of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Outcome of [`classify`]: what went wrong, what the caller may be told, and
/// how loudly to log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    pub safe_message: String,
    pub severity: Severity,
}

impl Classification {
    pub fn for_kind(kind: FailureKind) -> Self {
        Self {
            kind,
            safe_message: kind.safe_message().to_string(),
            severity: kind.severity(),
        }
    }

    /// Log the raw fault at the classified severity. The raw text goes to the
    /// log only, never into `safe_message`.
    pub fn log(&self, fault: &dyn fmt::Display, stage: &str) {
        match self.severity {
            Severity::Error => tracing::error!(
                kind = self.kind.name(),
                code = self.kind.code(),
                stage,
                fault = %fault,
                "upstream call failed"
            ),
            Severity::Warning => tracing::warn!(
                kind = self.kind.name(),
                code = self.kind.code(),
                stage,
                fault = %fault,
                "upstream call failed"
            ),
        }
    }
}

/// Map any crate error to its failure kind, safe message and severity.
///
/// Pure: no I/O, no logging. The relay and the single-shot service both call
/// this so the two surfaces share one vocabulary.
pub fn classify(error: &Error) -> Classification {
    let kind = match error {
        Error::Upstream(upstream) => upstream_kind(upstream),
        Error::Generation { kind, .. } => *kind,
        Error::Cache(_) => FailureKind::BackendUnavailable,
        _ => FailureKind::Unknown,
    };
    Classification::for_kind(kind)
}

/// [`classify`], then log the raw error at the classified severity.
pub fn classify_logged(error: &Error, stage: &str) -> Classification {
    let classification = classify(error);
    classification.log(error, stage);
    classification
}

fn upstream_kind(error: &UpstreamError) -> FailureKind {
    match error {
        UpstreamError::RateLimited { .. } => FailureKind::RateLimited,
        UpstreamError::TimedOut => FailureKind::TimedOut,
        UpstreamError::Provider { .. } => FailureKind::ProviderError,
        UpstreamError::Stream(_) => FailureKind::TransportFault,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;

    #[test]
    fn test_upstream_failures_never_leak_raw_text() {
        let err = Error::Upstream(UpstreamError::Provider {
            status: Some(500),
            message: "secret-internal-trace at line 42".into(),
        });
        let c = classify(&err);
        assert_eq!(c.kind, FailureKind::ProviderError);
        assert!(!c.safe_message.contains("secret"));
        assert_eq!(c.severity, Severity::Error);
    }

    #[test]
    fn test_stream_faults_use_fixed_message() {
        let c = classify_logged(
            &Error::Upstream(UpstreamError::Stream("connection reset by peer".into())),
            "consume_stream",
        );
        assert_eq!(c.kind, FailureKind::TransportFault);
        assert!(!c.safe_message.contains("reset"));
    }

    #[test]
    fn test_cache_faults_are_backend_unavailable() {
        let c = classify(&Error::Cache(CacheError::Unavailable("refused".into())));
        assert_eq!(c.kind, FailureKind::BackendUnavailable);
        assert_eq!(c.severity, Severity::Warning);
    }

    #[test]
    fn test_generation_kind_is_preserved() {
        let c = classify(&Error::generation(FailureKind::NoFragments, "0 frames"));
        assert_eq!(c.kind, FailureKind::NoFragments);
    }

    #[test]
    fn test_everything_else_is_unknown() {
        let c = classify(&Error::validation("bad"));
        assert_eq!(c.kind, FailureKind::Unknown);
        assert_eq!(c.safe_message, FailureKind::Unknown.safe_message());
    }
}
