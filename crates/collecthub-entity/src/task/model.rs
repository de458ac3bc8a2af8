//! Task entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::kind::TaskKind;
use super::status::TaskStatus;

/// A unit of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Which collection unit runs this task.
    pub task_type: TaskKind,
    /// Unit-specific configuration (JSON).
    pub config: serde_json::Value,
    /// Current status.
    pub status: TaskStatus,
    /// Higher runs first.
    pub priority: i32,
    /// Failed attempts so far.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// The task is due once this has elapsed (or when unset).
    pub next_run_time: Option<DateTime<Utc>>,
    /// Result payload of the last successful run (JSON).
    pub result: Option<serde_json::Value>,
    /// Error message of the last failed run.
    pub error_message: Option<String>,
    /// Trigger that spawned this task, if any.
    pub trigger_name: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last written.
    pub updated_at: DateTime<Utc>,
    /// When the current or last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a fresh pending task from creation data.
    pub fn from_create(id: Uuid, data: &CreateTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: data.name.clone(),
            task_type: data.task_type,
            config: data.config.clone(),
            status: TaskStatus::Pending,
            priority: data.priority,
            retry_count: 0,
            max_retries: data.max_retries,
            next_run_time: data.next_run_time,
            result: None,
            error_message: None,
            trigger_name: data.trigger_name.clone(),
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    /// Check whether the task is eligible to run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_run_time.is_none_or(|at| at <= now)
    }
}

/// Data required to create a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    /// Task name.
    pub name: String,
    /// Task type.
    pub task_type: TaskKind,
    /// Unit-specific configuration.
    pub config: serde_json::Value,
    /// Priority (higher runs first).
    pub priority: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Earliest run time (None = immediately due).
    pub next_run_time: Option<DateTime<Utc>>,
    /// Spawning trigger, if any.
    pub trigger_name: Option<String>,
}

/// The outcome payload recorded with a status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "lowercase")]
pub enum TaskOutcome {
    /// Result of a successful run.
    Success(serde_json::Value),
    /// Error message of a failed run.
    Failure(String),
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending tasks.
    pub pending: u64,
    /// Running tasks.
    pub running: u64,
    /// Completed tasks.
    pub completed: u64,
    /// Failed tasks.
    pub failed: u64,
    /// Cancelled tasks.
    pub cancelled: u64,
}

impl StatusCounts {
    /// Add `count` tasks of `status`.
    pub fn add(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
    }

    /// Count for a single status.
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Total number of tasks.
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}
