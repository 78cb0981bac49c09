use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::{Relay, RelayStream};

/// Redis PUBLISH/SUBSCRIBE relay.
///
/// Publishing reuses one multiplexed connection, re-established lazily after
/// a failure. Every subscription gets its own pub/sub connection.
pub struct RedisRelay {
    client: redis::Client,
    url: String,
    publisher: Mutex<Option<MultiplexedConnection>>,
}

impl RedisRelay {
    /// Validate the URL. No connection is made until first use.
    pub fn new(url: &str) -> Result<Self, RelayError> {
        let client =
            redis::Client::open(url).map_err(|e| RelayError::Connect(format!("open client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            publisher: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Round-trip a PING. Startup uses it to report reachability.
    pub async fn ping(&self) -> Result<(), RelayError> {
        let mut conn = self.publisher().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Connect(format!("ping: {e}")))
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, RelayError> {
        let mut guard = self.publisher.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RelayError::Connect(format!("publish connection: {e}")))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Relay for RedisRelay {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError> {
        let mut conn = self.publisher().await?;
        let result = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await;

        if let Err(e) = result {
            // Drop the cached connection so the next publish reconnects.
            *self.publisher.lock().await = None;
            return Err(RelayError::Publish(e.to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::Connect(format!("pubsub connection: {e}")))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| RelayError::Subscribe(format!("{topic}: {e}")))?;

        tracing::info!(topic, "subscribed to redis topic");

        let stream = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>()
                .map_err(|e| RelayError::Malformed(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}
