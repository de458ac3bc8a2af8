//! Engine lifecycle and housekeeping events.

use serde::{Deserialize, Serialize};

/// Events describing the engine as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// The engine started polling and firing triggers.
    Started {
        /// Maximum concurrently running tasks.
        max_concurrent_tasks: usize,
    },
    /// The engine stopped.
    Stopped {
        /// Tasks still running when the drain wait expired.
        abandoned: usize,
    },
    /// Old task history was purged.
    HistoryPurged {
        /// Number of task rows deleted.
        deleted: u64,
        /// Retention window in days.
        retention_days: i64,
    },
}
