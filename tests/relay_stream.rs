//! Streaming relay event sequences against a scripted provider.

use futures::StreamExt;
use shelfcast::cache::{CacheConfig, TieredCache};
use shelfcast::provider::{ScriptedProvider, UpstreamError};
use shelfcast::sink::InMemorySink;
use shelfcast::types::Fragment;
use shelfcast::{FailureKind, OutboundEvent, Query, RelayConfig, StreamingRelay};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    provider: Arc<ScriptedProvider>,
    cache: Arc<TieredCache>,
    sink: Arc<InMemorySink>,
    relay: StreamingRelay,
}

fn harness_with(provider: ScriptedProvider, pacing: Duration) -> Harness {
    let provider = Arc::new(provider);
    let cache = Arc::new(TieredCache::local_only(CacheConfig::default()));
    let sink = Arc::new(InMemorySink::default());
    let relay = StreamingRelay::builder(provider.clone(), cache.clone())
        .config(RelayConfig::default().with_pacing(pacing))
        .sink(sink.clone())
        .build();
    Harness {
        provider,
        cache,
        sink,
        relay,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedProvider::new(), Duration::ZERO)
}

fn tagged(name: &str) -> Query {
    Query::new(name, ["fantasy"]).unwrap()
}

fn untagged(name: &str) -> Query {
    Query::new(name, Vec::<String>::new()).unwrap()
}

async fn run(h: &Harness, query: Query) -> Vec<OutboundEvent> {
    let (events, _cancel) = h.relay.stream(query);
    let events: Vec<OutboundEvent> = events.collect().await;
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event: {:?}", events);
    assert!(events.last().unwrap().is_terminal(), "terminal event comes last");
    events
}

fn chunk(fragment: &str, text: &str) -> OutboundEvent {
    OutboundEvent::Chunk {
        fragment: fragment.into(),
        text: text.into(),
    }
}

#[tokio::test]
async fn fragments_become_chunks_then_done() {
    let h = harness();
    h.provider.push_stream([Some("A"), Some("B"), Some("C")]);

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(
        events,
        vec![
            chunk("A", "A"),
            chunk("B", "AB"),
            chunk("C", "ABC"),
            OutboundEvent::Done { text: "ABC".into() },
        ]
    );

    assert_eq!(h.cache.get(&tagged("Piranesi")).await.as_deref(), Some("ABC"));
    let saved = h.sink.recommendation("Piranesi", &["fantasy".to_string()]).unwrap();
    assert_eq!(saved.record.text, "ABC");
    assert_eq!(h.sink.searches().len(), 1);
}

#[tokio::test]
async fn fragments_without_content_are_skipped() {
    let h = harness();
    h.provider.push_stream([Some("A"), None, Some(""), Some("B")]);

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(
        events,
        vec![
            chunk("A", "A"),
            chunk("B", "AB"),
            OutboundEvent::Done { text: "AB".into() },
        ]
    );
}

#[tokio::test]
async fn untagged_query_resolves_tags_first() {
    let h = harness();
    h.provider.push_text("Fantasy, Magic, ");
    h.provider.push_stream([Some("Jonathan Strange")]);

    let events = run(&h, untagged("Piranesi")).await;
    assert_eq!(
        events[0],
        OutboundEvent::Tags(vec!["fantasy".into(), "magic".into()])
    );
    assert_eq!(events.len(), 3);

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].prompt.contains("fantasy, magic"));

    // Cached under the question the caller asked.
    assert!(h.cache.get(&untagged("Piranesi")).await.is_some());
    assert!(h
        .sink
        .recommendation("Piranesi", &["fantasy".to_string(), "magic".to_string()])
        .is_some());
}

#[tokio::test]
async fn tag_resolution_failure_does_not_block_generation() {
    let h = harness();
    h.provider.push_once(Err(UpstreamError::TimedOut));
    h.provider.push_stream([Some("A")]);

    let events = run(&h, untagged("Piranesi")).await;
    assert_eq!(
        events,
        vec![chunk("A", "A"), OutboundEvent::Done { text: "A".into() }]
    );
}

#[tokio::test]
async fn blank_tag_answer_emits_no_tags_event() {
    let h = harness();
    h.provider.push_text("  ");
    h.provider.push_stream([Some("A")]);

    let events = run(&h, untagged("Piranesi")).await;
    assert!(!events.iter().any(|e| matches!(e, OutboundEvent::Tags(_))));
}

#[tokio::test]
async fn no_fragments_is_reported() {
    let h = harness();
    h.provider.push_stream(Vec::<Option<String>>::new());

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].failure_kind(), Some(FailureKind::NoFragments));
    assert!(h.cache.get(&tagged("Piranesi")).await.is_none());
    assert!(h.sink.recommendations().is_empty());
}

#[tokio::test]
async fn content_free_fragments_are_an_empty_generation() {
    let h = harness();
    h.provider.push_stream([None, Some(""), None]);

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].failure_kind(), Some(FailureKind::EmptyGeneration));
}

#[tokio::test]
async fn rate_limit_before_stream_is_a_single_error() {
    let h = harness();
    h.provider
        .refuse_stream(UpstreamError::RateLimited { retry_after_ms: Some(1000) });

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(
        events,
        vec![OutboundEvent::error(
            FailureKind::RateLimited,
            FailureKind::RateLimited.safe_message()
        )]
    );
    assert_eq!(
        events[0].to_sse_frame(),
        "data: {\"error\":\"API rate limit exceeded. Please try again later.\"}\n\n"
    );
}

#[tokio::test]
async fn provider_error_message_is_not_leaked() {
    let h = harness();
    h.provider.refuse_stream(UpstreamError::Provider {
        status: Some(500),
        message: "stack trace: secret".into(),
    });

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(events[0].failure_kind(), Some(FailureKind::ProviderError));
    assert!(!events[0].to_json().contains("secret"));
}

#[tokio::test]
async fn mid_stream_failure_ends_without_done() {
    let h = harness();
    h.provider.push_stream_items(vec![
        Ok(Fragment::text("A")),
        Err(UpstreamError::Stream("connection reset by peer".into())),
        Ok(Fragment::text("never")),
    ]);

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], chunk("A", "A"));
    assert_eq!(events[1].failure_kind(), Some(FailureKind::TransportFault));
    assert!(!events[1].to_json().contains("reset"));
    assert!(h.cache.get(&tagged("Piranesi")).await.is_none());
}

#[tokio::test]
async fn cache_hit_skips_the_provider() {
    let h = harness();
    h.cache.set(&tagged("Piranesi"), "cached text", None).await;

    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(
        events,
        vec![OutboundEvent::Done {
            text: "cached text".into()
        }]
    );
    assert_eq!(h.provider.stream_calls(), 0);
    assert_eq!(h.provider.once_calls(), 0);
}

#[tokio::test]
async fn second_identical_query_is_served_from_cache() {
    let h = harness();
    h.provider.push_stream([Some("A"), Some("B")]);

    run(&h, tagged("Piranesi")).await;
    let events = run(&h, Query::new("piranesi ", ["FANTASY"]).unwrap()).await;
    assert_eq!(events, vec![OutboundEvent::Done { text: "AB".into() }]);
    assert_eq!(h.provider.stream_calls(), 1);
}

#[tokio::test]
async fn dropping_the_consumer_drops_the_upstream_stream() {
    let h = harness_with(
        ScriptedProvider::new().with_fragment_delay(Duration::from_millis(2)),
        Duration::ZERO,
    );
    h.provider.push_endless_stream("x");

    let (mut events, cancel) = h.relay.stream(tagged("Piranesi"));
    for _ in 0..3 {
        assert!(matches!(events.next().await, Some(OutboundEvent::Chunk { .. })));
    }
    assert_eq!(h.provider.open_streams(), 1);
    drop(events);
    assert!(cancel.is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.provider.open_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("upstream stream dropped after consumer went away");
    assert!(h.cache.get(&tagged("Piranesi")).await.is_none());
}

#[tokio::test]
async fn cancel_handle_ends_the_session_without_a_terminal() {
    let h = harness_with(
        ScriptedProvider::new().with_fragment_delay(Duration::from_millis(2)),
        Duration::ZERO,
    );
    h.provider.push_endless_stream("x");

    let (mut events, cancel) = h.relay.stream(tagged("Piranesi"));
    for _ in 0..2 {
        assert!(matches!(events.next().await, Some(OutboundEvent::Chunk { .. })));
    }
    cancel.cancel();

    let rest: Vec<OutboundEvent> = tokio::time::timeout(Duration::from_secs(5), events.collect())
        .await
        .expect("stream ends after cancel");
    assert!(rest.iter().all(|e| !e.is_terminal()), "{:?}", rest);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.provider.open_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("upstream stream dropped after cancel");
    assert!(h.sink.recommendations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chunks_are_paced() {
    let h = harness_with(ScriptedProvider::new(), Duration::from_millis(10));
    h.provider.push_stream([Some("A"), None, Some("B"), Some("C")]);

    let started = tokio::time::Instant::now();
    let events = run(&h, tagged("Piranesi")).await;
    assert_eq!(events.len(), 4);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn each_session_has_its_own_id() {
    let h = harness();
    h.provider.push_stream([Some("A")]);
    h.provider.push_stream([Some("B")]);
    let (a, _) = h.relay.stream(tagged("One"));
    let (b, _) = h.relay.stream(tagged("Two"));
    assert_ne!(a.session_id(), b.session_id());
}
