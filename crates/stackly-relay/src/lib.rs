//! Cross-process publish/subscribe relay.
//!
//! A [`Relay`] carries serialized presence events between server processes
//! and background workers. Delivery is best-effort: nothing is persisted and
//! subscribers only see messages published while they are subscribed.

pub mod backoff;
pub mod error;
pub mod memory;
pub mod redis_relay;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use stackly_core::PresenceEvent;

pub use backoff::ExponentialBackoff;
pub use error::RelayError;
pub use memory::MemoryRelay;
pub use redis_relay::RedisRelay;

/// Default topic for presence updates.
pub const STATUS_TOPIC: &str = "status_updates";

/// Raw payloads received on a subscribed topic.
pub type RelayStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

#[async_trait]
pub trait Relay: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError>;

    /// Subscribe to a topic. The stream ends when the backend connection drops.
    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError>;
}

/// Serialize a presence event and publish it.
pub async fn publish_event(
    relay: &dyn Relay,
    topic: &str,
    event: &PresenceEvent,
) -> Result<(), RelayError> {
    let payload = serde_json::to_string(event).map_err(|e| RelayError::Encode(e.to_string()))?;
    relay.publish(topic, &payload).await
}
