//! In-process broadcaster backed by a tokio broadcast channel

use clawline_api::Event;
use tokio::sync::broadcast;

use crate::{BroadcastError, BroadcastResult, Broadcaster};

/// Fans events out to any number of in-process subscribers.
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// publisher; observers resynchronize from the next snapshot.
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: &Event) -> BroadcastResult<()> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| BroadcastError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawline_api::EventPayload;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broadcaster = ChannelBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster
            .publish(&Event::new(EventPayload::Shutdown))
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "shutdown");
    }

    #[test]
    fn publish_without_subscribers_reports_error() {
        let broadcaster = ChannelBroadcaster::new(8);
        assert_eq!(broadcaster.subscriber_count(), 0);

        let result = broadcaster.publish(&Event::new(EventPayload::Shutdown));
        assert!(matches!(result, Err(BroadcastError::NoSubscribers)));
    }
}
