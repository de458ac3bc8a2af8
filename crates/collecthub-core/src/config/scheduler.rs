//! Scheduling engine configuration.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Poller, executor, retry, and history-retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the engine is started by the server binary.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Maximum number of tasks running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Retry budget applied to tasks created without an explicit one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: i32,
    /// Base delay for exponential backoff, in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: u64,
    /// Maximum number of due tasks fetched per poll cycle.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: u64,
    /// Cron expression (5 fields) for the history cleanup fire.
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,
    /// Completed and failed tasks older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// How long `stop` waits for in-flight tasks to drain, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Fixed UTC offset used to evaluate cron expressions, e.g. `"+08:00"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl SchedulerConfig {
    /// Poll cadence as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Backoff base as a [`Duration`].
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_seconds)
    }

    /// Drain timeout as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Parse the configured timezone offset.
    pub fn timezone_offset(&self) -> Result<FixedOffset, AppError> {
        parse_utc_offset(&self.timezone)
    }

    /// Check value ranges that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_concurrent_tasks == 0 {
            return Err(AppError::configuration(
                "scheduler.max_concurrent_tasks must be at least 1",
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "scheduler.poll_interval_seconds must be at least 1",
            ));
        }
        if self.default_max_retries < 0 {
            return Err(AppError::configuration(
                "scheduler.default_max_retries must not be negative",
            ));
        }
        if self.retry_base_delay_seconds == 0 {
            return Err(AppError::configuration(
                "scheduler.retry_base_delay_seconds must be at least 1",
            ));
        }
        if self.retention_days <= 0 {
            return Err(AppError::configuration(
                "scheduler.retention_days must be positive",
            ));
        }
        if self.poll_batch_size == 0 {
            return Err(AppError::configuration(
                "scheduler.poll_batch_size must be at least 1",
            ));
        }
        self.timezone_offset()?;
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            max_concurrent_tasks: default_max_concurrent(),
            default_max_retries: default_max_retries(),
            retry_base_delay_seconds: default_retry_base_delay(),
            poll_batch_size: default_poll_batch_size(),
            cleanup_cron: default_cleanup_cron(),
            retention_days: default_retention_days(),
            shutdown_grace_seconds: default_shutdown_grace(),
            timezone: default_timezone(),
        }
    }
}

/// Parse `"UTC"`, `"Z"`, or a `±HH:MM` offset.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, AppError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| AppError::configuration("invalid UTC offset"));
    }

    let invalid = || AppError::configuration(format!("invalid timezone offset '{value}'"));

    let (sign, rest) = match value.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_retries() -> i32 {
    3
}

fn default_retry_base_delay() -> u64 {
    300
}

fn default_poll_batch_size() -> u64 {
    100
}

fn default_cleanup_cron() -> String {
    "0 3 * * *".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_timezone() -> String {
    "+00:00".to_string()
}
