use std::time::Duration;

use crate::backend::{BackendResult, SearchBackend, SearchRequest, SearchResponse};
use crate::models::{FeedError, FeedErrorKind};

/// Search backend reached over HTTP with a JSON POST.
pub struct HttpSearchBackend {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSearchBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SearchBackend for HttpSearchBackend {
    fn search(&self, request: &SearchRequest) -> BackendResult<SearchResponse> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Accept", "application/json")
            .send_json(request)
            .map_err(|error| network_error(request.page, error))?;

        response.into_json::<SearchResponse>().map_err(|error| {
            FeedError::new(
                FeedErrorKind::TransientNetwork,
                format!("unreadable search response: {error}"),
            )
            .on_page(request.page)
        })
    }
}

fn network_error(page: u32, error: ureq::Error) -> FeedError {
    let message = match error {
        ureq::Error::Status(code, response) => {
            format!("search backend returned HTTP {code} ({})", response.status_text())
        }
        ureq::Error::Transport(transport) => format!("search request failed: {transport}"),
    };
    FeedError::new(FeedErrorKind::TransientNetwork, message).on_page(page)
}
