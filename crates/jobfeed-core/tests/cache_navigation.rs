mod support;

use std::sync::Arc;

use jobfeed_core::FeedConfig;
use jobfeed_core::Notice;
use jobfeed_core::models::{FeedErrorKind, JobRecord, SearchQuery};
use jobfeed_core::transport::ChannelTransport;
use support::{FakeBackend, ids, insert_event, job, session, wait_for_view};

fn rows(prefix: &str, count: usize, top: f64) -> Vec<JobRecord> {
    (0..count)
        .map(|index| {
            job(
                &format!("{prefix}{index}"),
                "A",
                "Software Engineer",
                top - index as f64 * 0.001,
            )
        })
        .collect()
}

fn query(page_size: u32) -> SearchQuery {
    SearchQuery::new(["engineer"])
        .with_sources(["A"])
        .with_page_size(page_size)
}

#[tokio::test]
async fn revisiting_cached_page_makes_no_network_call() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 20, 0.9), 40);
    backend.serve("engineer", 2, rows("p2-", 20, 0.5), 40);
    let session = session(
        FeedConfig::default(),
        backend.clone(),
        Arc::new(ChannelTransport::with_auto_ack()),
    );

    session.submit_query(query(20)).await.unwrap();
    session.go_to_page(2).await.unwrap();
    assert_eq!(session.snapshot().pagination.unwrap().page, 2);
    assert_eq!(backend.request_count(), 2);

    session.go_to_page(1).await.unwrap();
    let view = session.snapshot();
    assert_eq!(backend.request_count(), 2);
    assert_eq!(view.pagination.unwrap().page, 1);
    assert_eq!(view.jobs.len(), 20);
    assert_eq!(view.jobs[0].record.id, "p1-0");

    session.go_to_page(2).await.unwrap();
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn page_size_change_drops_cache_and_refetches() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 20, 0.9), 60);
    backend.serve("engineer", 2, rows("p2-", 20, 0.5), 60);
    let session = session(
        FeedConfig::default(),
        backend.clone(),
        Arc::new(ChannelTransport::with_auto_ack()),
    );

    session.submit_query(query(20)).await.unwrap();
    session.go_to_page(2).await.unwrap();
    session.go_to_page(1).await.unwrap();
    assert_eq!(backend.request_count(), 2);

    session.set_page_size(25).await.unwrap();
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].page, 1);
    assert_eq!(requests[2].page_size, 25);

    session.go_to_page(2).await.unwrap();
    let requests = backend.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[3].page_size, 25);
}

#[tokio::test]
async fn forward_page_of_known_rows_reverts_with_single_notice() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 2, 0.9), 10);
    backend.serve("engineer", 2, vec![job("p1-1", "A", "Software Engineer", 0.899)], 10);
    let config = FeedConfig::default().with_notice_dismiss_ms(50);
    let session = session(config, backend.clone(), Arc::new(ChannelTransport::with_auto_ack()));
    let mut view = session.watch();

    session.submit_query(query(2)).await.unwrap();
    session.go_to_page(2).await.unwrap();

    let reverted = session.snapshot();
    let pagination = reverted.pagination.unwrap();
    assert_eq!(pagination.page, 1);
    assert!(!pagination.has_next);
    assert_eq!(reverted.notice, Some(Notice::NoMoreResults { page: 1 }));
    assert_eq!(ids(&reverted), vec!["p1-0", "p1-1"]);

    let dismissed = wait_for_view(&mut view, |view| view.notice.is_none()).await;
    assert_eq!(dismissed.pagination.unwrap().page, 1);
}

#[tokio::test]
async fn backend_exhaustion_flag_wins_over_fresh_rows() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 2, 0.9), 10);
    backend.serve_exhausted("engineer", 2, rows("p2-", 2, 0.5), 10);
    let session = session(
        FeedConfig::default(),
        backend,
        Arc::new(ChannelTransport::with_auto_ack()),
    );

    session.submit_query(query(2)).await.unwrap();
    session.go_to_page(2).await.unwrap();

    let view = session.snapshot();
    assert_eq!(view.pagination.unwrap().page, 1);
    assert_eq!(view.notice, Some(Notice::NoMoreResults { page: 1 }));
}

#[tokio::test]
async fn insert_while_on_later_page_only_moves_the_count() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 2, 0.9), 4);
    backend.serve("engineer", 2, rows("p2-", 2, 0.5), 4);
    let transport = Arc::new(ChannelTransport::with_auto_ack());
    let session = session(FeedConfig::default(), backend.clone(), transport.clone());
    let mut view = session.watch();

    session.submit_query(query(2)).await.unwrap();
    session.go_to_page(2).await.unwrap();

    transport.publish(insert_event("new-1", "A", "Lead Engineer", 0.99));
    let counted = wait_for_view(&mut view, |view| view.total_found == 5).await;
    assert_eq!(ids(&counted), vec!["p2-0", "p2-1"]);

    session.go_to_page(1).await.unwrap();
    let first = session.snapshot();
    assert_eq!(backend.request_count(), 2);
    assert_eq!(first.total_found, 5);
}

#[tokio::test]
async fn update_to_row_on_other_cached_page_forces_refetch() {
    let backend = FakeBackend::new();
    backend.serve("engineer", 1, rows("p1-", 2, 0.9), 4);
    backend.serve("engineer", 2, rows("p2-", 2, 0.5), 4);
    let transport = Arc::new(ChannelTransport::with_auto_ack());
    let session = session(FeedConfig::default(), backend.clone(), transport.clone());

    session.submit_query(query(2)).await.unwrap();
    session.go_to_page(2).await.unwrap();

    transport.publish(serde_json::json!({
        "eventType": "UPDATE",
        "new": { "id": "p1-0", "source": "A", "title": "Renamed Engineer" }
    }));
    support::drain().await;

    session.go_to_page(1).await.unwrap();
    assert_eq!(backend.request_count(), 3);
}

#[tokio::test]
async fn invalid_navigation_is_rejected() {
    let backend = FakeBackend::new();
    let session = session(
        FeedConfig::default(),
        backend.clone(),
        Arc::new(ChannelTransport::with_auto_ack()),
    );

    let error = session.go_to_page(2).await.unwrap_err();
    assert_eq!(error.kind, FeedErrorKind::InvalidInput);

    session.submit_query(query(20)).await.unwrap();
    let error = session.go_to_page(0).await.unwrap_err();
    assert_eq!(error.kind, FeedErrorKind::InvalidInput);
    let error = session.set_page_size(0).await.unwrap_err();
    assert_eq!(error.kind, FeedErrorKind::InvalidInput);
    assert_eq!(backend.request_count(), 1);
}
