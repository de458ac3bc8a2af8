//! PostgreSQL task repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use collecthub_core::error::{AppError, ErrorKind};
use collecthub_core::result::AppResult;
use collecthub_core::types::{PageRequest, PageResponse};
use collecthub_entity::task::{CreateTask, StatusCounts, Task, TaskOutcome, TaskStatus};

use crate::store::{StatusTimestamps, TaskStore};

/// Shared SET clause for status writes. Binds `$2` status, `$3` stamp
/// started, `$4` stamp ended, `$5` clear ended.
const STATUS_SET: &str = "status = $2, \
     started_at = CASE WHEN $3 THEN NOW() ELSE started_at END, \
     ended_at = CASE WHEN $4 THEN NOW() WHEN $5 THEN NULL ELSE ended_at END, \
     updated_at = NOW()";

/// Task store backed by the `tasks` table.
#[derive(Debug, Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    /// Create a new task repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_texts(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn db_error(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, message, e)
}

#[async_trait]
impl TaskStore for TaskRepository {
    async fn insert(&self, data: &CreateTask) -> AppResult<Task> {
        sqlx::query_as::<_, Task>(
            "INSERT INTO tasks (name, task_type, config, priority, max_retries, next_run_time, trigger_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(&data.name)
        .bind(data.task_type)
        .bind(&data.config)
        .bind(data.priority)
        .bind(data.max_retries)
        .bind(data.next_run_time)
        .bind(&data.trigger_name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to insert task"))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Task>> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find task"))
    }

    async fn find_pending(&self, now: DateTime<Utc>, limit: u64) -> AppResult<Vec<Task>> {
        sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks \
             WHERE status = 'pending' AND (next_run_time IS NULL OR next_run_time <= $1) \
             ORDER BY priority DESC, created_at ASC \
             LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find pending tasks"))
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE ($1::task_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count tasks"))?;

        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE ($1::task_status IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(status)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list tasks"))?;

        Ok(PageResponse::new(tasks, page, total as u64))
    }

    async fn count_by_status(&self) -> AppResult<StatusCounts> {
        let rows: Vec<(TaskStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error("Failed to count tasks by status"))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count as u64);
        }
        Ok(counts)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        status: TaskStatus,
    ) -> AppResult<bool> {
        let effects = StatusTimestamps::entering(status);
        let sql = format!("UPDATE tasks SET {STATUS_SET} WHERE id = $1 AND status::text = ANY($6)");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(status)
            .bind(effects.stamp_started)
            .bind(effects.stamp_ended)
            .bind(effects.clear_ended)
            .bind(status_texts(expected))
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to transition task status"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let effects = StatusTimestamps::entering(TaskStatus::Pending);
        let sql = format!(
            "UPDATE tasks SET {STATUS_SET}, next_run_time = $7 \
             WHERE id = $1 AND status::text = ANY($6)"
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(TaskStatus::Pending)
            .bind(effects.stamp_started)
            .bind(effects.stamp_ended)
            .bind(effects.clear_ended)
            .bind(status_texts(expected))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to requeue task"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        outcome: Option<&TaskOutcome>,
    ) -> AppResult<()> {
        let effects = StatusTimestamps::entering(status);
        let (result, error) = match outcome {
            Some(TaskOutcome::Success(value)) => (Some(value), None),
            Some(TaskOutcome::Failure(message)) => (None, Some(message.as_str())),
            None => (None, None),
        };

        let sql = format!(
            "UPDATE tasks SET {STATUS_SET}, \
             result = COALESCE($6, result), \
             error_message = CASE WHEN $6 IS NOT NULL THEN NULL ELSE COALESCE($7, error_message) END \
             WHERE id = $1"
        );
        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(status)
            .bind(effects.stamp_started)
            .bind(effects.stamp_ended)
            .bind(effects.clear_ended)
            .bind(result)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to update task status"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Task {id} not found")));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE tasks SET retry_count = retry_count + 1, updated_at = NOW() \
             WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to increment retry count"))?
        .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))
    }

    async fn set_next_run_time(&self, id: Uuid, at: Option<DateTime<Utc>>) -> AppResult<()> {
        let updated =
            sqlx::query("UPDATE tasks SET next_run_time = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to set next run time"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Task {id} not found")));
        }
        Ok(())
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks \
             WHERE status::text = ANY($2) AND COALESCE(ended_at, updated_at) < $1",
        )
        .bind(cutoff)
        .bind(status_texts(statuses))
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to purge task history"))?;
        Ok(result.rows_affected())
    }
}
