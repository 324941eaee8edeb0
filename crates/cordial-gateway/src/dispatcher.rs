use tokio::sync::broadcast;

use cordial_types::events::{ChangeEvent, ChangeFilter};

use crate::subscription::Subscription;

const CHANNEL_CAPACITY: usize = 1024;

/// Fans change events out to every in-process subscriber.
#[derive(Clone)]
pub struct Dispatcher {
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { broadcast_tx }
    }

    /// Subscribe to events matching `filter`.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription::local(self.broadcast_tx.subscribe(), filter)
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordial_types::events::{ChangeKind, Table};
    use serde_json::json;

    fn message(channel: &str) -> ChangeEvent {
        ChangeEvent::insert(Table::Messages, &json!({ "id": "m", "channel_id": channel })).unwrap()
    }

    #[tokio::test]
    async fn subscribers_only_see_matching_events() {
        let dispatcher = Dispatcher::new();
        let mut general = dispatcher.subscribe(
            ChangeFilter::table(Table::Messages)
                .only(ChangeKind::Insert)
                .eq("channel_id", "general"),
        );
        let mut everything = dispatcher.subscribe(ChangeFilter::table(Table::Messages));

        dispatcher.publish(message("random"));
        dispatcher.publish(message("general"));

        let first = general.next().await.unwrap();
        assert_eq!(first.column("channel_id").as_deref(), Some("general"));
        assert!(general.try_next().is_none());

        assert_eq!(
            everything.next().await.unwrap().column("channel_id").as_deref(),
            Some("random")
        );
        assert!(everything.try_next().is_some());
    }

    #[tokio::test]
    async fn dropping_a_subscription_releases_the_receiver() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe(ChangeFilter::table(Table::Servers));
        assert_eq!(dispatcher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
