//! Task store trait consumed by the scheduling engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use collecthub_core::result::AppResult;
use collecthub_core::types::{PageRequest, PageResponse};
use collecthub_entity::task::{CreateTask, StatusCounts, Task, TaskOutcome, TaskStatus};

/// Durable, queryable storage of tasks and their run history.
///
/// Every write bumps `updated_at`. Status writes additionally maintain the
/// lifecycle timestamps as described by [`StatusTimestamps`].
#[async_trait]
pub trait TaskStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a new pending task with `retry_count = 0`.
    async fn insert(&self, data: &CreateTask) -> AppResult<Task>;

    /// Fetch a task by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Task>>;

    /// Pending tasks that are due at `now`, highest priority first and
    /// oldest first within a priority, at most `limit` of them.
    async fn find_pending(&self, now: DateTime<Utc>, limit: u64) -> AppResult<Vec<Task>>;

    /// Page through tasks, newest first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>>;

    /// Number of tasks in each status.
    async fn count_by_status(&self) -> AppResult<StatusCounts>;

    /// Atomically move a task to `status` if its current status is one of
    /// `expected`. Returns `false` when the task is missing or in another
    /// status.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        status: TaskStatus,
    ) -> AppResult<bool>;

    /// Atomically move a task back to `pending`, due at `at`, if its current
    /// status is one of `expected`. Nothing is written when it returns
    /// `false`.
    async fn requeue(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Set the status unconditionally, recording an outcome when given.
    ///
    /// A success outcome replaces `result` and clears `error_message`; a
    /// failure outcome replaces `error_message`.
    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        outcome: Option<&TaskOutcome>,
    ) -> AppResult<()>;

    /// Increment `retry_count`, returning the new value.
    async fn increment_retry(&self, id: Uuid) -> AppResult<i32>;

    /// Set or clear the earliest run time.
    async fn set_next_run_time(&self, id: Uuid, at: Option<DateTime<Utc>>) -> AppResult<()>;

    /// Delete tasks in one of `statuses` that ended before `cutoff`.
    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> AppResult<u64>;
}

/// Timestamp side effects of entering a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTimestamps {
    /// Entering `running` stamps `started_at`.
    pub stamp_started: bool,
    /// Entering a terminal status stamps `ended_at`.
    pub stamp_ended: bool,
    /// Returning to `pending` clears `ended_at`.
    pub clear_ended: bool,
}

impl StatusTimestamps {
    /// Side effects of moving into `status`.
    pub fn entering(status: TaskStatus) -> Self {
        Self {
            stamp_started: status == TaskStatus::Running,
            stamp_ended: status.is_terminal(),
            clear_ended: status == TaskStatus::Pending,
        }
    }

    /// Apply these effects to an in-memory task.
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        if self.stamp_started {
            task.started_at = Some(now);
        }
        if self.stamp_ended {
            task.ended_at = Some(now);
        }
        if self.clear_ended {
            task.ended_at = None;
        }
        task.updated_at = now;
    }
}
