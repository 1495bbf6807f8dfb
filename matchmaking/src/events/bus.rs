//! Event bus for engine progress
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and never
//! fails the caller: with no subscribers the event is simply dropped, and a
//! slow subscriber sees `RecvError::Lagged` rather than stalling the batch.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::EngineEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 1024;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects events by batch and type
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub batch_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Matches everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn types(mut self, event_types: &[&str]) -> Self {
        self.event_types = Some(event_types.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn matches(&self, event: &EngineEvent) -> bool {
        if let Some(ref wanted) = self.batch_id {
            if event.batch_id() != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        true
    }
}
