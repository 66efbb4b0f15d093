// Observer fan-out for service notifications.

use shelf_common::events::ServiceEvent;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Broadcasts `ServiceEvent`s to any number of subscribers. Publishing with no
/// subscribers is not an error; slow subscribers see `Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ServiceEvent) {
        trace!(event = event.kind(), "publishing service event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ServiceEvent::QueueChanged { queue_length: 2, local_change: true });
        bus.publish(ServiceEvent::LinkUploaded);

        assert!(matches!(
            rx.recv().await,
            Ok(ServiceEvent::QueueChanged { queue_length: 2, local_change: true })
        ));
        assert!(matches!(rx.recv().await, Ok(ServiceEvent::LinkUploaded)));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new().publish(ServiceEvent::EverythingRemoved);
    }
}
