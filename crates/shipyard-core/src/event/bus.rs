//! Broadcast event bus for distributing `ExecutionEvent` to multiple subscribers.
//!
//! Publishing with no active subscribers is a no-op.

use shipyard_types::event::ExecutionEvent;
use shipyard_types::status::ExecutionStatus;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer event bus for instance lifecycle events.
///
/// Cloning the bus clones the sender, allowing multiple producers and consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    /// Wait on `rx` until `execution_id` completes.
    ///
    /// Returns `None` if the bus closes first. Lagged receivers skip ahead.
    pub async fn wait_for_completion(
        rx: &mut broadcast::Receiver<ExecutionEvent>,
        execution_id: Uuid,
    ) -> Option<ExecutionStatus> {
        loop {
            match rx.recv().await {
                Ok(ExecutionEvent::ExecutionCompleted {
                    execution_id: id,
                    status,
                }) if id == execution_id => return Some(status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
