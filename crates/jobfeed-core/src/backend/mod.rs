pub mod http;

pub use http::HttpSearchBackend;

use serde::{Deserialize, Serialize};

use crate::models::{FeedResult, JobRecord, SearchQuery};

pub type BackendResult<T> = FeedResult<T>;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SearchRequest {
    pub keywords: Vec<String>,
    pub location: String,
    pub skills: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub work_setting: Option<String>,
    pub sources: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SearchRequest {
    pub fn for_page(query: &SearchQuery, page: u32, user_id: Option<String>) -> Self {
        Self {
            keywords: query.keywords().to_vec(),
            location: query.location().to_string(),
            skills: query.skills().iter().cloned().collect(),
            experience_level: query
                .experience_level()
                .map(|level| level.as_str().to_string()),
            work_setting: Some(query.work_setting().as_str().to_string()),
            sources: query.sources().iter().cloned().collect(),
            page,
            page_size: query.page_size(),
            user_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WirePagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_previous_page: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
    #[serde(default)]
    pub total_found: u64,
    #[serde(default)]
    pub pagination: WirePagination,
    #[serde(default)]
    pub statistics: Option<serde_json::Value>,
    /// Set by the backend when it knows the requested page has nothing new;
    /// takes precedence over the client-side heuristic.
    #[serde(default)]
    pub no_more_results: Option<bool>,
}

impl SearchResponse {
    pub fn new(jobs: Vec<JobRecord>, total_found: u64, page: u32, page_size: u32) -> Self {
        let total_pages = u32::try_from(total_found.div_ceil(u64::from(page_size.max(1))).max(1))
            .unwrap_or(u32::MAX);
        Self {
            jobs,
            total_found,
            pagination: WirePagination {
                page,
                page_size,
                total_pages,
                has_next_page: page < total_pages,
                has_previous_page: page > 1,
            },
            statistics: None,
            no_more_results: None,
        }
    }
}

/// Pull side of the feed. Implementations block; the session runs them on
/// tokio's blocking pool.
pub trait SearchBackend: Send + Sync {
    fn search(&self, request: &SearchRequest) -> BackendResult<SearchResponse>;
}
