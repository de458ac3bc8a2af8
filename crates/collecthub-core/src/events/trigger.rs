//! Recurring trigger events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the recurring trigger registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriggerEvent {
    /// A trigger was registered, or replaced an existing one of the same name.
    Scheduled {
        /// Trigger name.
        name: String,
        /// Cron expression.
        cron: String,
        /// Whether an existing trigger was replaced.
        replaced: bool,
    },
    /// A trigger was removed.
    Removed {
        /// Trigger name.
        name: String,
    },
    /// A trigger fired and inserted a task.
    Fired {
        /// Trigger name.
        name: String,
        /// The task created by this firing.
        task_id: Uuid,
    },
}
