use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use crate::types::EngineEvent;

/// Broadcast fan-out for engine events.
///
/// Subscribers see every event published after they subscribe. A subscriber
/// that falls more than `capacity` events behind loses the oldest ones.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("engine event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Next event from a subscription, skipping past lag.
/// `None` once the bus itself is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<EngineEvent>) -> Option<EngineEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "event subscriber lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
