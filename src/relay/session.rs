//! One relay session: the per-request state machine.

use super::RelayShared;
use crate::classify::{classify_logged, Classification};
use crate::error_code::FailureKind;
use crate::provider::UpstreamError;
use crate::sink::{log_search_quietly, save_quietly};
use crate::types::{OutboundEvent, Query};
use crate::Error;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    ResolvingTags,
    Generating,
    Done,
    Failed,
}

/// The consumer went away or the session was cancelled.
#[derive(Debug)]
struct Cancelled;

type Step<T = ()> = std::result::Result<T, Cancelled>;

/// State of one streamed recommendation.
///
/// Moves `Start -> ResolvingTags? -> Generating -> (Done | Failed)` and sends at
/// most one terminal event, whatever path it takes.
pub struct StreamSession {
    id: String,
    query: Query,
    phase: Phase,
    accumulated: String,
    fragment_count: usize,
    received_count: usize,
    terminal_sent: bool,
    tx: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
}

impl StreamSession {
    pub(crate) fn new(
        id: String,
        query: Query,
        tx: mpsc::Sender<OutboundEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            query,
            phase: Phase::Start,
            accumulated: String::new(),
            fragment_count: 0,
            received_count: 0,
            terminal_sent: false,
            tx,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Fragments that carried text.
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Every fragment the upstream produced, with or without text.
    pub fn received_count(&self) -> usize {
        self.received_count
    }

    /// Drive the session to completion or cancellation. Returns the final phase.
    #[instrument(name = "relay_session", skip_all, fields(session = %self.id, book = %self.query.log_name()))]
    pub(crate) async fn run(self, shared: Arc<RelayShared>) -> Phase {
        let mut session = self;
        if session.drive(&shared).await.is_err() {
            info!(phase = ?session.phase, fragments = session.fragment_count, "session cancelled");
        }
        session.phase
    }

    /// Race `fut` against cancellation and against the consumer going away.
    async fn until_cancelled<F: Future>(&self, fut: F) -> Step<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = self.tx.closed() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }

    async fn emit(&mut self, event: OutboundEvent) -> Step {
        if self.terminal_sent {
            debug!(?event, "dropping event after terminal");
            return Ok(());
        }
        let terminal = event.is_terminal();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| Cancelled)?,
        }
        if terminal {
            self.terminal_sent = true;
        }
        Ok(())
    }

    async fn fail(&mut self, classification: Classification) -> Step {
        self.phase = Phase::Failed;
        self.emit(OutboundEvent::error(
            classification.kind,
            classification.safe_message,
        ))
        .await
    }

    async fn drive(&mut self, shared: &RelayShared) -> Step {
        info!(tags = self.query.tags().len(), "recommendation stream started");
        self.until_cancelled(log_search_quietly(shared.sink.as_ref(), &self.query))
            .await?;

        if let Some(cached) = self.until_cancelled(shared.cache.get(&self.query)).await? {
            info!(chars = cached.len(), "serving cached recommendation");
            self.phase = Phase::Done;
            self.accumulated = cached.clone();
            return self.emit(OutboundEvent::Done { text: cached }).await;
        }

        let mut effective = self.query.clone();
        if !self.query.has_tags() {
            self.phase = Phase::ResolvingTags;
            match self.until_cancelled(shared.tags.resolve(self.query.name())).await? {
                Ok(tags) if !tags.is_empty() => {
                    effective = self.query.with_tags(&tags);
                    self.emit(OutboundEvent::Tags(tags)).await?;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "tag resolution failed, continuing without tags"),
            }
        }

        self.phase = Phase::Generating;
        let request = shared.prompts.recommendation_prompt(&effective);
        let mut fragments = match self
            .until_cancelled(shared.provider.generate_stream(&request))
            .await?
        {
            Ok(stream) => stream,
            Err(e) => {
                let classification = classify_logged(&Error::from(e), "open_stream");
                return self.fail(classification).await;
            }
        };

        let pacing = shared.config.pacing();
        while let Some(item) = self.until_cancelled(fragments.next()).await? {
            let fragment = match item {
                Ok(fragment) => fragment,
                Err(e) => {
                    drop(fragments);
                    // Whatever breaks an open stream is a transport fault.
                    let fault = match e {
                        UpstreamError::Stream(_) => e,
                        other => UpstreamError::Stream(other.to_string()),
                    };
                    let classification = classify_logged(&Error::from(fault), "consume_stream");
                    return self.fail(classification).await;
                }
            };
            self.received_count += 1;
            let Some(text) = fragment.content() else {
                debug!(received = self.received_count, "fragment without content");
                continue;
            };
            self.accumulated.push_str(text);
            self.fragment_count += 1;
            let event = OutboundEvent::Chunk {
                fragment: text.to_string(),
                text: self.accumulated.clone(),
            };
            self.emit(event).await?;
            if !pacing.is_zero() {
                self.until_cancelled(tokio::time::sleep(pacing)).await?;
            }
        }
        drop(fragments);

        info!(
            received = self.received_count,
            fragments = self.fragment_count,
            chars = self.accumulated.len(),
            "upstream stream finished"
        );

        if self.fragment_count == 0 {
            let kind = if self.received_count == 0 {
                FailureKind::NoFragments
            } else {
                FailureKind::EmptyGeneration
            };
            let detail = format!(
                "{} fragments received, none with content",
                self.received_count
            );
            let classification = classify_logged(&Error::generation(kind, detail), "complete");
            return self.fail(classification).await;
        }

        self.phase = Phase::Done;
        let text = self.accumulated.clone();
        self.emit(OutboundEvent::Done { text: text.clone() }).await?;

        shared.cache.set(&self.query, &text, None).await;
        save_quietly(shared.sink.as_ref(), &effective, &text).await;
        info!(chars = text.len(), "recommendation stream completed");
        Ok(())
    }
}
