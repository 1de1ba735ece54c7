use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{DEFAULT_PAGE_SIZE, FeedError, FeedResult};
use crate::supervisor::BackoffPolicy;

/// Session-level knobs for the search client and the change-feed supervisor.
///
/// Every field has a default, so hosts only send what they override:
///
/// ```rust
/// use jobfeed_core::config::FeedConfig;
///
/// let config = FeedConfig::from_json(r#"{"max_reconnect_attempts": 5}"#).unwrap();
/// assert_eq!(config.max_reconnect_attempts, 5);
/// assert_eq!(config.reconnect_delay_ms, 1_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Search endpoint that accepts a POSTed search request.
    #[serde(default)]
    pub search_endpoint: Option<String>,

    /// Forwarded to the search backend for personalized scoring.
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// First reconnect delay; doubles per attempt up to
    /// `max_reconnect_delay_ms`.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Consecutive failed attempts before the supervisor gives up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Relative jitter applied to every reconnect delay (0.2 = +/-20%).
    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,

    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Failed probes in a row that force a resubscribe.
    #[serde(default = "default_max_failed_health_checks")]
    pub max_failed_health_checks: u32,

    #[serde(default = "default_notice_dismiss_ms")]
    pub notice_dismiss_ms: u64,

    /// How long a pushed record keeps its "new" marker.
    #[serde(default = "default_fresh_flag_ms")]
    pub fresh_flag_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    20
}

fn default_reconnect_jitter() -> f64 {
    0.2
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_max_failed_health_checks() -> u32 {
    3
}

fn default_notice_dismiss_ms() -> u64 {
    4_000
}

fn default_fresh_flag_ms() -> u64 {
    8_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            search_endpoint: None,
            user_id: None,
            request_timeout_ms: default_request_timeout_ms(),
            default_page_size: default_page_size(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_jitter: default_reconnect_jitter(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_failed_health_checks: default_max_failed_health_checks(),
            notice_dismiss_ms: default_notice_dismiss_ms(),
            fresh_flag_ms: default_fresh_flag_ms(),
        }
    }
}

impl FeedConfig {
    pub fn from_json(raw: &str) -> FeedResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| FeedError::invalid_input(format!("invalid feed config: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.default_page_size == 0 {
            return Err(FeedError::invalid_input("default_page_size must be positive"));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(FeedError::invalid_input(format!(
                "reconnect_jitter '{}' must lie in [0, 1)",
                self.reconnect_jitter
            )));
        }
        if self.reconnect_delay_ms == 0 || self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(FeedError::invalid_input(
                "reconnect delays must be positive and capped at or above the base delay",
            ));
        }
        if self.health_check_interval_ms == 0 || self.max_failed_health_checks == 0 {
            return Err(FeedError::invalid_input(
                "health checks need a positive interval and threshold",
            ));
        }
        Ok(())
    }

    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    pub fn with_health_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.health_check_interval_ms = interval_ms;
        self
    }

    pub fn with_notice_dismiss_ms(mut self, dismiss_ms: u64) -> Self {
        self.notice_dismiss_ms = dismiss_ms;
        self
    }

    pub fn with_fresh_flag_ms(mut self, fresh_ms: u64) -> Self {
        self.fresh_flag_ms = fresh_ms;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn notice_dismiss(&self) -> Duration {
        Duration::from_millis(self.notice_dismiss_ms)
    }

    pub fn fresh_flag(&self) -> Duration {
        Duration::from_millis(self.fresh_flag_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.reconnect_delay_ms),
            cap: Duration::from_millis(self.max_reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            jitter: self.reconnect_jitter,
        }
    }
}
