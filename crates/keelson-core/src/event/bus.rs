//! Broadcast bus for run-lifecycle notifications.
//!
//! Publishing with no active subscribers is a no-op, so the engine publishes
//! unconditionally and observers (CLI progress, `get_output` waiters, tests)
//! subscribe when they care.

use keelson_types::event::RunEvent;
use tokio::sync::broadcast;

/// Default channel capacity. A lagging subscriber loses the oldest events.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Cloning the bus clones the sender; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_types::status::WorkflowStatus;

    fn finished(id: &str) -> RunEvent {
        RunEvent::WorkflowFinished {
            workflow_id: id.to_string(),
            status: WorkflowStatus::Successful,
        }
    }

    #[tokio::test]
    async fn test_each_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.publish(finished("wf"));

        assert_eq!(rx1.recv().await.unwrap().workflow_id(), "wf");
        assert_eq!(rx2.recv().await.unwrap().workflow_id(), "wf");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(finished("a"));
        let mut rx = bus.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_lagged_receiver_reports_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(finished(&format!("wf-{i}")));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
