//! Event bus for outbound notifications
//!
//! Session state changes, gathered ICE candidates and resource releases are
//! broadcast to the host (and its signaling collaborator) through here.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;
use tracing::trace;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`SystemEvent`]s
///
/// Fire-and-forget: events published with no subscriber are dropped, and a
/// subscriber that falls more than the channel capacity behind receives
/// `Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SystemEvent) {
        trace!("Publishing {}", event.event_name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
