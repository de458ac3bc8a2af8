//! Broadcast bus for engine lifecycle events.

use tokio::sync::broadcast;
use tracing;

use collecthub_core::events::{DomainEvent, EventPayload};

/// Default channel capacity; slow subscribers lag rather than block.
const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle for publishing and subscribing to [`DomainEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        let event = DomainEvent::new(payload.into());
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
