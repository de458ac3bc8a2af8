//! Lifecycle events emitted by the scheduling engine.
//!
//! Events are published on the engine's broadcast bus and consumed by
//! whatever sits in front of the engine (REST layer, metrics, CLI tail).
//! They never drive control flow inside the engine.

pub mod engine;
pub mod task;
pub mod trigger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use engine::EngineEvent;
pub use task::TaskEvent;
pub use trigger::TriggerEvent;

/// Wrapper for all domain events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub payload: EventPayload,
}

/// Union of all domain event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event")]
pub enum EventPayload {
    /// A task lifecycle event.
    Task(TaskEvent),
    /// A recurring trigger event.
    Trigger(TriggerEvent),
    /// An engine start/stop or housekeeping event.
    Engine(EngineEvent),
}

impl DomainEvent {
    /// Create a new domain event stamped with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

impl From<TaskEvent> for EventPayload {
    fn from(event: TaskEvent) -> Self {
        Self::Task(event)
    }
}

impl From<TriggerEvent> for EventPayload {
    fn from(event: TriggerEvent) -> Self {
        Self::Trigger(event)
    }
}

impl From<EngineEvent> for EventPayload {
    fn from(event: EngineEvent) -> Self {
        Self::Engine(event)
    }
}
