//! In-memory provider that replays queued answers.

use super::{FragmentStream, GenerationProvider, GenerationRequest, UpstreamError, UpstreamResult};
use crate::types::Fragment;
use crate::BoxStream;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

enum StreamScript {
    Items(Vec<UpstreamResult<Fragment>>),
    Endless(String),
    Refuse(UpstreamError),
}

/// Decrements the live-stream counter when the stream is dropped or finishes.
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider that answers from queues filled ahead of time.
///
/// `generate_once` pops from the once-queue, `generate_stream` from the
/// stream-queue; an empty queue answers with a provider error.
#[derive(Default)]
pub struct ScriptedProvider {
    once: Mutex<VecDeque<UpstreamResult<String>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<GenerationRequest>>,
    fragment_delay: Duration,
    once_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before yielding each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn push_once(&self, answer: UpstreamResult<String>) -> &Self {
        lock(&self.once).push_back(answer);
        self
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push_once(Ok(text.into()))
    }

    /// A stream yielding one fragment per element; `None` is a fragment without content.
    pub fn push_stream<I, S>(&self, fragments: I) -> &Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let items = fragments
            .into_iter()
            .map(|f| {
                Ok(Fragment {
                    content: f.map(Into::into),
                })
            })
            .collect();
        self.push_stream_items(items)
    }

    pub fn push_stream_items(&self, items: Vec<UpstreamResult<Fragment>>) -> &Self {
        lock(&self.streams).push_back(StreamScript::Items(items));
        self
    }

    /// A stream that never ends on its own.
    pub fn push_endless_stream(&self, fragment: impl Into<String>) -> &Self {
        lock(&self.streams).push_back(StreamScript::Endless(fragment.into()));
        self
    }

    /// The next `generate_stream` call fails before any fragment.
    pub fn refuse_stream(&self, error: UpstreamError) -> &Self {
        lock(&self.streams).push_back(StreamScript::Refuse(error));
        self
    }

    /// Every request seen so far, both kinds, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    pub fn once_calls(&self) -> usize {
        self.once_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet finished or dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate_once(&self, request: &GenerationRequest) -> UpstreamResult<String> {
        self.once_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        lock(&self.once)
            .pop_front()
            .unwrap_or_else(|| Err(UpstreamError::provider("no scripted answer left")))
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> UpstreamResult<FragmentStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        let script = lock(&self.streams)
            .pop_front()
            .ok_or_else(|| UpstreamError::provider("no scripted stream left"))?;

        let source: BoxStream<'static, UpstreamResult<Fragment>> = match script {
            StreamScript::Refuse(e) => return Err(e),
            StreamScript::Items(items) => Box::pin(stream::iter(items)),
            StreamScript::Endless(text) => Box::pin(stream::repeat(Ok(Fragment::text(text)))),
        };

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = OpenGuard(self.open_streams.clone());
        let delay = self.fragment_delay;
        let paced = stream::unfold((source, guard), move |(mut source, guard)| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let item = source.next().await?;
            Some((item, (source, guard)))
        });
        Ok(Box::pin(paced))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
