use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::RelayError;
use crate::{Relay, RelayStream};

/// In-process relay over Tokio broadcast channels.
///
/// Used when no Redis is configured, and by tests that model several server
/// processes inside one test binary. Like Redis, messages published with no
/// subscriber are dropped.
pub struct MemoryRelay {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl MemoryRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError> {
        // Err only means nobody is subscribed.
        let _ = self.sender(topic).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError> {
        let rx = self.sender(topic).subscribe();
        let stream = BroadcastStream::new(rx).map(|item| {
            item.map_err(|e| match e {
                BroadcastStreamRecvError::Lagged(n) => RelayError::Lagged(n),
            })
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish_event;
    use stackly_core::{PresenceEvent, PresenceStatus, UserId};

    #[tokio::test]
    async fn subscribers_receive_published_payloads() {
        let relay = MemoryRelay::default();
        let mut a = relay.subscribe("status_updates").await.unwrap();
        let mut b = relay.subscribe("status_updates").await.unwrap();

        relay.publish("status_updates", "hello").await.unwrap();

        assert_eq!(a.next().await.unwrap().unwrap(), "hello");
        assert_eq!(b.next().await.unwrap().unwrap(), "hello");
        assert_eq!(relay.subscriber_count("status_updates"), 2);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let relay = MemoryRelay::default();
        let mut other = relay.subscribe("other").await.unwrap();
        relay.publish("status_updates", "x").await.unwrap();
        relay.publish("other", "y").await.unwrap();
        assert_eq!(other.next().await.unwrap().unwrap(), "y");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let relay = MemoryRelay::default();
        relay.publish("status_updates", "dropped").await.unwrap();
        assert_eq!(relay.subscriber_count("status_updates"), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag_error() {
        let relay = MemoryRelay::new(2);
        let mut sub = relay.subscribe("t").await.unwrap();
        for i in 0..5 {
            relay.publish("t", &i.to_string()).await.unwrap();
        }
        assert!(matches!(sub.next().await.unwrap(), Err(RelayError::Lagged(3))));
        assert_eq!(sub.next().await.unwrap().unwrap(), "3");
    }

    #[tokio::test]
    async fn publish_event_serializes_wire_shape() {
        let relay = MemoryRelay::default();
        let mut sub = relay.subscribe("status_updates").await.unwrap();
        let event = PresenceEvent::status_update(UserId::new(4), PresenceStatus::Available, None);

        publish_event(&relay, "status_updates", &event).await.unwrap();

        let payload = sub.next().await.unwrap().unwrap();
        let parsed: PresenceEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed, event);
    }
}
