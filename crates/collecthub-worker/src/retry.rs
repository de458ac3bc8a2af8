//! Retry/backoff state machine and manual task transitions.
//!
//! ```text
//! pending -> running -> completed
//!                    -> pending (retry, after backoff)
//!                    -> failed
//! pending | failed -> cancelled            (manual)
//! any but running  -> pending, due now     (manual retry)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing;
use uuid::Uuid;

use collecthub_core::error::AppError;
use collecthub_core::result::AppResult;
use collecthub_database::TaskStore;
use collecthub_entity::task::{Task, TaskOutcome, TaskStatus};

use crate::unit::UnitError;

/// Smallest backoff base; a retried task is always due strictly later.
pub const MIN_BASE_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
}

/// What the state machine decided after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending, due at `next_run_time`.
    Retry {
        /// Retry count after this failure.
        retry_count: i32,
        /// Backoff applied.
        delay: Duration,
        /// When the task becomes due again.
        next_run_time: DateTime<Utc>,
    },
    /// Terminal failure.
    Fail {
        /// Retry count recorded with the failure.
        retry_count: i32,
    },
}

impl RetryPolicy {
    /// Create a policy with `base_delay` as the backoff base, raised to
    /// [`MIN_BASE_DELAY`] when smaller.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay: base_delay.max(MIN_BASE_DELAY),
        }
    }

    /// Backoff base.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The same policy with a different base, when one is given.
    pub fn with_base(self, base_delay: Option<Duration>) -> Self {
        base_delay.map_or(self, Self::new)
    }

    /// `base × 2^retry_count`, saturating.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let factor = 2u32.checked_pow(retry_count.max(0) as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide the transition after a failed attempt.
    ///
    /// The failure is counted first; the task fails terminally once the
    /// counted retries reach `max_retries`, or immediately when the error is
    /// not retryable. The recorded count never exceeds `max_retries`.
    pub fn decide(
        &self,
        retry_count: i32,
        max_retries: i32,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if !retryable {
            return RetryDecision::Fail { retry_count };
        }

        let next = retry_count.saturating_add(1);
        if next >= max_retries {
            return RetryDecision::Fail {
                retry_count: next.min(max_retries.max(retry_count)),
            };
        }

        let delay = self.backoff(next);
        let next_run_time = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::Retry {
            retry_count: next,
            delay,
            next_run_time,
        }
    }
}

/// Merge a unit's output into the stored result.
///
/// Object outputs are merged key-by-key over an existing object result; any
/// other output replaces it.
pub fn merge_result(existing: Option<&Value>, output: Option<Value>) -> Value {
    match (existing, output) {
        (Some(Value::Object(base)), Some(Value::Object(update))) => {
            let mut merged = base.clone();
            merged.extend(update);
            Value::Object(merged)
        }
        (_, Some(output)) => output,
        (Some(existing), None) => existing.clone(),
        (None, None) => Value::Null,
    }
}

/// Record a successful attempt.
pub async fn record_success(
    store: &dyn TaskStore,
    task: &Task,
    output: Option<Value>,
) -> AppResult<()> {
    let result = merge_result(task.result.as_ref(), output);
    store
        .update_status(
            task.id,
            TaskStatus::Completed,
            Some(&TaskOutcome::Success(result)),
        )
        .await
}

/// Record a failed attempt and apply the retry decision.
///
/// The status is written last, so the task stays `running` (and invisible to
/// the poller) until its retry count and next run time are in place.
pub async fn record_failure(
    store: &dyn TaskStore,
    task: &Task,
    policy: &RetryPolicy,
    error: &UnitError,
    now: DateTime<Utc>,
) -> AppResult<RetryDecision> {
    let decision = policy.decide(
        task.retry_count,
        task.max_retries,
        error.is_retryable(),
        now,
    );
    let outcome = TaskOutcome::Failure(error.to_string());

    match &decision {
        RetryDecision::Retry { next_run_time, .. } => {
            store.increment_retry(task.id).await?;
            store.set_next_run_time(task.id, Some(*next_run_time)).await?;
            store
                .update_status(task.id, TaskStatus::Pending, Some(&outcome))
                .await?;
        }
        RetryDecision::Fail { retry_count } => {
            if *retry_count > task.retry_count {
                store.increment_retry(task.id).await?;
            }
            store
                .update_status(task.id, TaskStatus::Failed, Some(&outcome))
                .await?;
        }
    }
    Ok(decision)
}

async fn load(store: &dyn TaskStore, id: Uuid) -> AppResult<Task> {
    store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))
}

/// Cancel a pending or failed task.
pub async fn cancel(store: &dyn TaskStore, id: Uuid) -> AppResult<Task> {
    let task = load(store, id).await?;
    if !task.status.can_cancel() {
        return Err(AppError::conflict(format!(
            "Task {id} is {} and cannot be cancelled",
            task.status
        )));
    }

    let cancellable = [TaskStatus::Pending, TaskStatus::Failed];
    if !store
        .compare_and_set_status(id, &cancellable, TaskStatus::Cancelled)
        .await?
    {
        let current = load(store, id).await?;
        return Err(AppError::conflict(format!(
            "Task {id} changed to {} before it could be cancelled",
            current.status
        )));
    }

    tracing::info!(task_id = %id, "Task cancelled");
    load(store, id).await
}

/// Force a non-running task back to pending, due immediately.
///
/// The retry count is kept, so a task that already exhausted its budget gets
/// exactly one more attempt.
pub async fn retry_now(store: &dyn TaskStore, id: Uuid, now: DateTime<Utc>) -> AppResult<Task> {
    let task = load(store, id).await?;
    if !task.status.can_requeue() {
        return Err(AppError::conflict(format!(
            "Task {id} is running and cannot be retried"
        )));
    }

    let requeueable: Vec<TaskStatus> = TaskStatus::ALL
        .into_iter()
        .filter(TaskStatus::can_requeue)
        .collect();
    if !store.requeue(id, &requeueable, now).await? {
        return Err(AppError::conflict(format!(
            "Task {id} started running before it could be retried"
        )));
    }

    tracing::info!(task_id = %id, retry_count = task.retry_count, "Task requeued");
    load(store, id).await
}
