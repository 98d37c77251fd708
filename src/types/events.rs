//! Outbound events produced by the streaming relay.

use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::error_code::FailureKind;

/// Event emitted by the relay towards the caller.
///
/// A session emits `Tags? -> Chunk* -> (Done | Error)`, with exactly one
/// terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Tags resolved for a query that arrived without any
    Tags(Vec<String>),

    /// One fragment plus the full text accumulated so far, so a client that
    /// only sees the latest event can still render everything
    Chunk { fragment: String, text: String },

    /// Terminal failure. `kind` stays server-side; only `message` goes on the wire
    Error { kind: FailureKind, message: String },

    /// Terminal success
    Done { text: String },
}

/// Wire shape of each event.
#[derive(Serialize)]
#[serde(untagged)]
enum Wire<'a> {
    Tags { tags: &'a [String] },
    Chunk { chunk: &'a str, text: &'a str },
    Error { error: &'a str },
    Done { done: bool, text: &'a str },
}

impl OutboundEvent {
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundEvent::Error { .. } | OutboundEvent::Done { .. })
    }

    /// Failure kind of an error event.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OutboundEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn wire(&self) -> Wire<'_> {
        match self {
            OutboundEvent::Tags(tags) => Wire::Tags { tags },
            OutboundEvent::Chunk { fragment, text } => Wire::Chunk {
                chunk: fragment,
                text,
            },
            OutboundEvent::Error { message, .. } => Wire::Error { error: message },
            OutboundEvent::Done { text } => Wire::Done { done: true, text },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.wire()).unwrap_or_default()
    }

    /// `data: <json>\n\n`
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_sse_frame())
    }
}

impl Serialize for OutboundEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.wire().serialize(serializer)
    }
}
