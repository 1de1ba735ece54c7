#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobfeed_core::backend::{BackendResult, SearchBackend, SearchRequest, SearchResponse};
use jobfeed_core::models::{FeedError, FeedErrorKind, JobRecord};
use jobfeed_core::supervisor::ConnectionSupervisor;
use jobfeed_core::transport::ChannelTransport;
use jobfeed_core::{FeedConfig, FeedSession, FeedView};
use tokio::sync::watch;

#[derive(Clone)]
struct StoredPage {
    jobs: Vec<JobRecord>,
    total_found: u64,
    no_more_results: Option<bool>,
}

/// Search backend serving canned pages keyed by `(keywords, page)`.
#[derive(Default)]
pub struct FakeBackend {
    pages: Mutex<HashMap<(String, u32), StoredPage>>,
    failing: Mutex<HashMap<String, String>>,
    holds: Mutex<HashMap<String, Receiver<()>>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, keywords: &str, page: u32, jobs: Vec<JobRecord>, total_found: u64) {
        self.pages.lock().unwrap().insert(
            (keywords.to_string(), page),
            StoredPage {
                jobs,
                total_found,
                no_more_results: None,
            },
        );
    }

    pub fn serve_exhausted(&self, keywords: &str, page: u32, jobs: Vec<JobRecord>, total_found: u64) {
        self.pages.lock().unwrap().insert(
            (keywords.to_string(), page),
            StoredPage {
                jobs,
                total_found,
                no_more_results: Some(true),
            },
        );
    }

    pub fn fail(&self, keywords: &str, message: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(keywords.to_string(), message.to_string());
    }

    /// Blocks the next request for `keywords` until the returned sender fires.
    pub fn hold(&self, keywords: &str) -> Sender<()> {
        let (release, gate) = channel();
        self.holds.lock().unwrap().insert(keywords.to_string(), gate);
        release
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl SearchBackend for FakeBackend {
    fn search(&self, request: &SearchRequest) -> BackendResult<SearchResponse> {
        let keywords = request.keywords.join(" ");
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.holds.lock().unwrap().remove(&keywords);
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }

        if let Some(message) = self.failing.lock().unwrap().get(&keywords) {
            return Err(FeedError::new(FeedErrorKind::TransientNetwork, message.clone()));
        }

        let stored = self
            .pages
            .lock()
            .unwrap()
            .get(&(keywords, request.page))
            .cloned();
        let Some(stored) = stored else {
            return Ok(SearchResponse::new(Vec::new(), 0, request.page, request.page_size));
        };

        let mut response = SearchResponse::new(
            stored.jobs,
            stored.total_found,
            request.page,
            request.page_size,
        );
        response.no_more_results = stored.no_more_results;
        Ok(response)
    }
}

pub fn job(id: &str, source: &str, title: &str, score: f64) -> JobRecord {
    JobRecord::new(id, source, title, score)
}

pub fn insert_event(id: &str, source: &str, title: &str, score: f64) -> serde_json::Value {
    serde_json::json!({
        "eventType": "INSERT",
        "new": { "id": id, "source": source, "title": title, "match_score": score }
    })
}

/// Routes session logs to the test harness; `RUST_LOG=jobfeed_core=debug`
/// shows every transition.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session(
    config: FeedConfig,
    backend: Arc<FakeBackend>,
    transport: Arc<ChannelTransport>,
) -> FeedSession {
    init_tracing();
    let supervisor = ConnectionSupervisor::new(
        config.backoff_policy(),
        config.health_check_interval(),
        config.max_failed_health_checks,
    )
    .with_seed(7);
    FeedSession::with_supervisor(config, backend, transport, supervisor)
}

pub async fn wait_for_view(
    view: &mut watch::Receiver<FeedView>,
    predicate: impl FnMut(&FeedView) -> bool,
) -> FeedView {
    tokio::time::timeout(Duration::from_secs(5), view.wait_for(predicate))
        .await
        .expect("view never reached the expected state")
        .expect("session dropped")
        .clone()
}

/// Lets the session pump drain whatever the transport already queued.
pub async fn drain() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn ids(view: &FeedView) -> Vec<String> {
    view.jobs.iter().map(|job| job.record.id.clone()).collect()
}
