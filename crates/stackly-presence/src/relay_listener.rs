use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use stackly_core::PresenceEvent;
use stackly_relay::{ExponentialBackoff, Relay, RelayError};

use crate::fanout::Broadcaster;

/// Whether the listener currently holds a relay subscription. While false
/// the process runs local-only: its own broadcasts still reach its own
/// connections, nothing arrives from other processes.
#[derive(Clone, Debug, Default)]
pub struct RelayHealth(Arc<AtomicBool>);

impl RelayHealth {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }
}

pub struct RelayListener {
    relay: Arc<dyn Relay>,
    topic: String,
    broadcaster: Broadcaster,
    backoff: ExponentialBackoff,
    health: RelayHealth,
}

impl RelayListener {
    pub fn new(
        relay: Arc<dyn Relay>,
        topic: impl Into<String>,
        broadcaster: Broadcaster,
        backoff: ExponentialBackoff,
    ) -> Self {
        Self {
            relay,
            topic: topic.into(),
            broadcaster,
            backoff,
            health: RelayHealth::default(),
        }
    }

    pub fn health(&self) -> RelayHealth {
        self.health.clone()
    }

    /// Spawn the listener. It exits when `cancel` fires and never otherwise.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(topic = %self.topic, relay = self.relay.name(), "relay listener started");

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.relay.subscribe(&self.topic) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    self.backoff.reset();
                    self.health.set(true);
                    tracing::info!(topic = %self.topic, "relay subscription active");

                    loop {
                        let item = tokio::select! {
                            _ = cancel.cancelled() => {
                                self.health.set(false);
                                tracing::info!("relay listener stopped");
                                return;
                            }
                            item = stream.next() => item,
                        };
                        match item {
                            Some(Ok(payload)) => {
                                relay_payload(&self.broadcaster, &payload);
                            }
                            Some(Err(RelayError::Lagged(n))) => {
                                tracing::warn!(skipped = n, "relay listener lagged, dropped updates");
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "dropping relay message");
                            }
                            None => {
                                tracing::warn!(topic = %self.topic, "relay subscription ended, reconnecting");
                                break;
                            }
                        }
                    }
                    self.health.set(false);
                }
                Err(e) => {
                    self.health.set(false);
                    tracing::warn!(error = %e, "relay unreachable, running local-only");
                }
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "relay reconnect scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.health.set(false);
        tracing::info!("relay listener stopped");
    }
}

/// Parse one relay payload and fan it out to every local connection.
/// Returns the number of connections reached, or `None` when the payload
/// was dropped as malformed.
pub fn relay_payload(broadcaster: &Broadcaster, payload: &str) -> Option<usize> {
    match serde_json::from_str::<PresenceEvent>(payload) {
        Ok(event) => {
            let delivered = broadcaster.send_all(&event);
            tracing::debug!(user_id = %event.user_id(), delivered, "relayed presence event");
            Some(delivered)
        }
        Err(e) => {
            tracing::warn!(error = %e, payload_len = payload.len(), "malformed relay message dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use stackly_core::{ChannelId, PresenceStatus, UserId};
    use stackly_relay::{MemoryRelay, RelayStream, STATUS_TOPIC};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn broadcaster() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        (Arc::clone(&registry), Broadcaster::new(registry))
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let (registry, broadcaster) = broadcaster();
        let mut conn = registry.add(UserId::new(1), ChannelId::room(1));

        assert_eq!(relay_payload(&broadcaster, "not json"), None);
        assert_eq!(relay_payload(&broadcaster, r#"{"type":"USER_STATUS_UPDATE"}"#), None);
        assert!(conn.rx.try_recv().is_err());

        let ok = r#"{"type":"USER_STATUS_UPDATE","user_id":2,"status":"AVAILABLE","message":null}"#;
        assert_eq!(relay_payload(&broadcaster, ok), Some(1));
        assert!(conn.rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn forwards_relay_messages_and_survives_garbage() {
        let relay = Arc::new(MemoryRelay::default());
        let (registry, broadcaster) = broadcaster();
        let mut conn = registry.add(UserId::new(1), ChannelId::room(1));

        let listener = RelayListener::new(
            relay.clone(),
            STATUS_TOPIC,
            broadcaster,
            ExponentialBackoff::default(),
        );
        let health = listener.health();
        let cancel = CancellationToken::new();
        let handle = listener.spawn(cancel.clone());

        while relay.subscriber_count(STATUS_TOPIC) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(health.is_connected());

        relay.publish(STATUS_TOPIC, "{{{").await.unwrap();
        let event = PresenceEvent::status_update(UserId::new(5), PresenceStatus::Away, Some("walk".into()));
        stackly_relay::publish_event(relay.as_ref(), STATUS_TOPIC, &event)
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), conn.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(serde_json::from_str::<PresenceEvent>(&frame).unwrap(), event);

        cancel.cancel();
        handle.await.unwrap();
        assert!(!health.is_connected());
    }

    /// Relay that refuses every subscription.
    struct Unreachable {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Relay for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn publish(&self, _: &str, _: &str) -> Result<(), RelayError> {
            Err(RelayError::Connect("refused".into()))
        }
        async fn subscribe(&self, _: &str) -> Result<RelayStream, RelayError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Connect("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_relay_retries_until_cancelled() {
        let relay = Arc::new(Unreachable {
            attempts: AtomicUsize::new(0),
        });
        let (_registry, broadcaster) = broadcaster();
        let listener = RelayListener::new(
            relay.clone(),
            STATUS_TOPIC,
            broadcaster,
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4)),
        );
        let health = listener.health();
        let cancel = CancellationToken::new();
        let handle = listener.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(relay.attempts.load(Ordering::SeqCst) >= 3);
        assert!(!health.is_connected());

        cancel.cancel();
        handle.await.unwrap();
    }
}
