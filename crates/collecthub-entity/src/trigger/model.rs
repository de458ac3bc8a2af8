//! Recurring trigger model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{CreateTask, TaskKind};

/// The task shape spawned by each firing of a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Task type of spawned tasks.
    pub task_type: TaskKind,
    /// Configuration copied into every spawned task.
    pub config: serde_json::Value,
    /// Priority of spawned tasks.
    pub priority: i32,
    /// Retry budget of spawned tasks.
    pub max_retries: i32,
}

impl TaskTemplate {
    /// Build the creation data for one firing.
    ///
    /// The task name is the trigger name suffixed with the firing timestamp,
    /// so the runs of one trigger stay distinguishable in history.
    pub fn instantiate(&self, trigger_name: &str, fired_at: DateTime<Utc>) -> CreateTask {
        CreateTask {
            name: format!("{trigger_name}-{}", fired_at.format("%Y%m%d%H%M%S")),
            task_type: self.task_type,
            config: self.config.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            next_run_time: None,
            trigger_name: Some(trigger_name.to_string()),
        }
    }
}

/// A named, schedule-bound task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique trigger name.
    pub name: String,
    /// Five-field cron expression.
    pub cron: String,
    /// Template for spawned tasks.
    pub template: TaskTemplate,
    /// When the trigger was registered.
    pub created_at: DateTime<Utc>,
    /// Whether the trigger currently fires.
    pub active: bool,
}
