//! Task lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Events describing a single task's progress through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// A task row was inserted.
    Created {
        /// The task ID.
        task_id: Uuid,
        /// The task name.
        name: String,
        /// The task type.
        task_type: String,
    },
    /// A task was claimed and its collection unit invoked.
    Started {
        /// The task ID.
        task_id: Uuid,
        /// The task name.
        name: String,
        /// One-based attempt number (retry count at claim time plus one).
        attempt: i32,
    },
    /// A collection unit reported one collected item.
    ItemCollected {
        /// The task ID.
        task_id: Uuid,
        /// Unit-defined description of the item.
        item: Value,
    },
    /// A run attempt succeeded.
    Completed {
        /// The task ID.
        task_id: Uuid,
        /// Wall-clock duration of the attempt in milliseconds.
        duration_ms: u64,
    },
    /// A run attempt failed and the task was re-queued with backoff.
    RetryScheduled {
        /// The task ID.
        task_id: Uuid,
        /// Retry count after the failure.
        retry_count: i32,
        /// When the task becomes due again.
        next_run_time: DateTime<Utc>,
        /// The failure message.
        error: String,
    },
    /// A task reached the terminal failed state.
    Failed {
        /// The task ID.
        task_id: Uuid,
        /// The failure message.
        error: String,
    },
    /// A task was cancelled by a caller.
    Cancelled {
        /// The task ID.
        task_id: Uuid,
    },
    /// A task was manually re-queued for immediate execution.
    Requeued {
        /// The task ID.
        task_id: Uuid,
    },
}
