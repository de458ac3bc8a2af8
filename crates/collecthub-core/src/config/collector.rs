//! Settings for the built-in HTTP article collector.

use serde::{Deserialize, Serialize};

/// HTTP collection settings shared by fetch-based collection units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Pause between consecutive requests to the same source, in milliseconds.
    #[serde(default = "default_delay_between_requests")]
    pub delay_between_requests_ms: u64,
    /// Upper bound on items fetched by a single run.
    #[serde(default = "default_max_items")]
    pub max_items_per_run: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_seconds: default_request_timeout(),
            delay_between_requests_ms: default_delay_between_requests(),
            max_items_per_run: default_max_items(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("collecthub/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delay_between_requests() -> u64 {
    2000
}

fn default_max_items() -> usize {
    100
}
