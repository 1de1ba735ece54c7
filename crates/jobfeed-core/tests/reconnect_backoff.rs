mod support;

use std::sync::Arc;
use std::time::Duration;

use jobfeed_core::FeedConfig;
use jobfeed_core::models::{ChannelSignal, ConnectionState, FeedErrorKind, SearchQuery};
use jobfeed_core::transport::ChannelTransport;
use support::{FakeBackend, ids, job, session, wait_for_view};
use tokio::time::Instant;

fn engineer_backend() -> Arc<FakeBackend> {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, vec![job("k1", "A", "Backend Engineer", 0.9)], 1);
    backend
}

fn query() -> SearchQuery {
    SearchQuery::new(["engineer"]).with_sources(["A"])
}

#[tokio::test]
async fn reconnects_with_doubling_delay_then_gives_up_until_retried() {
    let config = FeedConfig::default()
        .with_reconnect_jitter(0.0)
        .with_max_reconnect_attempts(3);
    let transport = Arc::new(ChannelTransport::new());
    let session = session(config, engineer_backend(), transport.clone());
    let mut view = session.watch();

    session.submit_query(query()).await.unwrap();
    assert_eq!(transport.subscribe_calls(), 1);
    tokio::time::pause();

    for (attempt, delay_secs) in [(1_u32, 1_u64), (2, 2), (3, 4)] {
        let failed_at = Instant::now();
        transport.report(ChannelSignal::ChannelError("socket closed".to_string()));
        wait_for_view(&mut view, |view| {
            view.connection.state == ConnectionState::Error && view.connection.attempts == attempt
        })
        .await;
        wait_for_view(&mut view, |view| {
            view.connection.state == ConnectionState::Subscribing
        })
        .await;
        assert!(failed_at.elapsed() >= Duration::from_secs(delay_secs));
        assert_eq!(transport.subscribe_calls(), attempt as usize + 1);
    }

    transport.report(ChannelSignal::TimedOut);
    let exhausted = wait_for_view(&mut view, |view| view.connection.exhausted).await;
    assert_eq!(exhausted.connection.state, ConnectionState::TimedOut);
    let error = exhausted.error.as_ref().expect("exhausted feed surfaces an error");
    assert_eq!(error.kind, FeedErrorKind::ChannelDisconnect);
    assert!(!error.is_recoverable());
    assert_eq!(ids(&exhausted), vec!["k1"]);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.subscribe_calls(), 4);

    session.retry_connection().await.unwrap();
    let retried = session.snapshot();
    assert_eq!(retried.connection.state, ConnectionState::Subscribing);
    assert_eq!(retried.connection.attempts, 0);
    assert!(!retried.connection.exhausted);
    assert_eq!(retried.error, None);
    assert_eq!(transport.subscribe_calls(), 5);
    assert_eq!(transport.active_epochs().len(), 1);

    transport.report(ChannelSignal::Subscribed);
    wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribed
    })
    .await;
}

#[tokio::test]
async fn successful_subscribe_resets_attempts() {
    let config = FeedConfig::default().with_reconnect_jitter(0.0);
    let transport = Arc::new(ChannelTransport::new());
    let session = session(config, engineer_backend(), transport.clone());
    let mut view = session.watch();

    session.submit_query(query()).await.unwrap();
    tokio::time::pause();

    transport.report(ChannelSignal::Closed);
    wait_for_view(&mut view, |view| view.connection.attempts == 1).await;
    wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribing
    })
    .await;

    transport.report(ChannelSignal::Subscribed);
    let subscribed = wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribed
    })
    .await;
    assert_eq!(subscribed.connection.attempts, 0);
}

#[tokio::test]
async fn rejected_subscribe_is_retried() {
    let transport = Arc::new(ChannelTransport::with_auto_ack());
    transport.reject_next_subscribe("permission denied");
    let session = session(FeedConfig::default(), engineer_backend(), transport.clone());
    let mut view = session.watch();

    session.submit_query(query()).await.unwrap();
    tokio::time::pause();

    wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribed
    })
    .await;
    assert_eq!(transport.subscribe_calls(), 2);
    assert_eq!(transport.active_epochs().len(), 1);
    assert_eq!(session.snapshot().error, None);
}

#[tokio::test]
async fn failed_health_probes_force_resubscribe() {
    let transport = Arc::new(ChannelTransport::with_auto_ack());
    let session = session(FeedConfig::default(), engineer_backend(), transport.clone());
    let mut view = session.watch();

    session.submit_query(query()).await.unwrap();
    wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribed
    })
    .await;
    tokio::time::pause();

    let started = Instant::now();
    transport.set_healthy(false);
    while transport.subscribe_calls() < 2 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(started.elapsed() >= Duration::from_secs(89));
    assert_eq!(transport.active_epochs().len(), 1);

    transport.set_healthy(true);
    let recovered = wait_for_view(&mut view, |view| {
        view.connection.state == ConnectionState::Subscribed
    })
    .await;
    assert_eq!(recovered.connection.attempts, 0);
}
