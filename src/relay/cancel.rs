use tokio_util::sync::CancellationToken;

/// Stops a relay session from the outside.
///
/// Dropping the [`RelayStream`](super::RelayStream) has the same effect; the
/// handle exists for callers that keep the stream but want it to end now.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
