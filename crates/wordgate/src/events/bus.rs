//! Central pub/sub bus for state-manager events, backed by a tokio
//! broadcast channel: synchronous dispatch in emission order, a slow or
//! absent subscriber never blocks emission (spec §9 "Event emitter").

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::Event;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Fire-and-forget: a channel with no subscribers silently drops the
    /// event, which is fine — nobody is watching yet.
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
