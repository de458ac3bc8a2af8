//! Collection unit trait: the pluggable body of a task.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use collecthub_core::error::AppError;
use collecthub_core::events::{EventPayload, TaskEvent};
use collecthub_entity::task::{Task, TaskKind};

use crate::events::EventBus;

/// Trait implemented by every task body.
#[async_trait]
pub trait CollectionUnit: Send + Sync + std::fmt::Debug {
    /// The task kind this unit runs.
    fn kind(&self) -> TaskKind;

    /// Backoff base overriding the engine default for this unit's tasks.
    fn retry_base_delay(&self) -> Option<Duration> {
        None
    }

    /// Run one attempt of `task`.
    async fn run(&self, task: &Task, ctx: &UnitContext) -> Result<Option<Value>, UnitError>;
}

/// Failure of a single run attempt.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// Retrying would fail identically; skips the retry budget.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// May succeed on a later attempt.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Infrastructure error raised inside the unit.
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl UnitError {
    /// Whether the retry state machine may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Per-attempt handle passed to a unit.
#[derive(Debug, Clone)]
pub struct UnitContext {
    task_id: Uuid,
    events: EventBus,
}

impl UnitContext {
    /// Create a context for `task_id`.
    pub fn new(task_id: Uuid, events: EventBus) -> Self {
        Self { task_id, events }
    }

    /// ID of the task being run.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Report one collected item.
    pub fn item_collected(&self, item: Value) {
        self.events.publish(TaskEvent::ItemCollected {
            task_id: self.task_id,
            item,
        });
    }

    /// Publish an arbitrary engine event.
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        self.events.publish(payload);
    }
}
