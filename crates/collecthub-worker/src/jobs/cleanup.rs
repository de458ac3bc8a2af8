//! Task history cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing;

use collecthub_core::error::AppError;
use collecthub_core::events::EngineEvent;
use collecthub_core::result::AppResult;
use collecthub_database::TaskStore;
use collecthub_entity::task::{Task, TaskKind, TaskStatus};

use crate::unit::{CollectionUnit, UnitContext, UnitError};

/// Statuses whose rows are purged once they age out.
pub const PURGED_STATUSES: [TaskStatus; 2] = [TaskStatus::Completed, TaskStatus::Failed];

/// Delete completed and failed tasks that ended more than `retention_days`
/// before `now`. Returns the number of deleted rows.
#[tracing::instrument(skip(store))]
pub async fn purge_history(
    store: &dyn TaskStore,
    retention_days: i64,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    let cutoff = history_cutoff(retention_days, now)?;
    let deleted = store.delete_older_than(cutoff, &PURGED_STATUSES).await?;
    tracing::info!(deleted, retention_days, cutoff = %cutoff, "Purged task history");
    Ok(deleted)
}

/// The instant `retention_days` before `now`.
pub fn history_cutoff(retention_days: i64, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    if retention_days <= 0 {
        return Err(AppError::validation("retention_days must be positive"));
    }
    TimeDelta::try_days(retention_days)
        .and_then(|retention| now.checked_sub_signed(retention))
        .ok_or_else(|| {
            AppError::validation(format!("retention_days {retention_days} is out of range"))
        })
}

#[derive(Debug, Default, Deserialize)]
struct CleanupConfig {
    #[serde(default)]
    retention_days: Option<i64>,
}

/// Runs `history_cleanup` tasks.
#[derive(Debug)]
pub struct HistoryCleanupUnit {
    store: Arc<dyn TaskStore>,
    retention_days: i64,
}

impl HistoryCleanupUnit {
    /// Create a unit purging rows older than `retention_days` unless a task
    /// overrides it.
    pub fn new(store: Arc<dyn TaskStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
        }
    }
}

#[async_trait]
impl CollectionUnit for HistoryCleanupUnit {
    fn kind(&self) -> TaskKind {
        TaskKind::HistoryCleanup
    }

    async fn run(&self, task: &Task, ctx: &UnitContext) -> Result<Option<Value>, UnitError> {
        let config: CleanupConfig = if task.config.is_null() {
            CleanupConfig::default()
        } else {
            serde_json::from_value(task.config.clone())
                .map_err(|e| UnitError::Permanent(format!("invalid cleanup config: {e}")))?
        };
        let retention_days = config.retention_days.unwrap_or(self.retention_days);
        history_cutoff(retention_days, Utc::now())
            .map_err(|e| UnitError::Permanent(e.message))?;

        let deleted = purge_history(self.store.as_ref(), retention_days, Utc::now()).await?;
        ctx.publish(EngineEvent::HistoryPurged {
            deleted,
            retention_days,
        });

        Ok(Some(serde_json::json!({
            "deleted": deleted,
            "retention_days": retention_days,
        })))
    }
}
