//! Deferred status reset.
//!
//! A reset job fires once, after its delay, and has no cancellation handle.
//! If the user picked another status in the meantime the job still forces
//! AVAILABLE; only an OFFLINE user is left alone. The job announces the
//! reset on the relay, so it behaves the same whether it runs next to live
//! connections or in a worker process. A job scheduled inside a server can
//! carry that process's [`Broadcaster`]; it is used only when the relay
//! publish fails, so local clients still see the reset in degraded mode.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::task::TaskTracker;

use stackly_core::{JobId, PresenceEvent, PresenceStatus, StatusRecord, UserId};
use stackly_relay::{publish_event, Relay};
use stackly_store::StatusStore;

use crate::fanout::Broadcaster;

/// A unit of deferred work.
pub trait Job: Send + 'static {
    fn name(&self) -> &'static str;
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Runs jobs after a delay.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, job: Box<dyn Job>, delay: Duration) -> JobId;
}

/// In-process scheduler on Tokio timers.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    tracker: TaskTracker,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs scheduled but not finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(&self, job: Box<dyn Job>, delay: Duration) -> JobId {
        let id = JobId::new();
        let job_id = id.clone();
        tracing::debug!(job_id = %id, job = job.name(), delay_secs = delay.as_secs(), "job scheduled");
        self.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!(job_id = %job_id, job = job.name(), "job running");
            job.run().await;
        });
        id
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    /// User was OFFLINE when the job fired.
    SkippedOffline,
    /// User missing or storage failed.
    Abandoned,
}

/// Reverts a user to AVAILABLE and announces it on the relay.
pub struct StatusResetJob {
    pub user_id: UserId,
    store: Arc<dyn StatusStore>,
    relay: Arc<dyn Relay>,
    topic: String,
    local: Option<Broadcaster>,
}

impl StatusResetJob {
    pub fn new(
        user_id: UserId,
        store: Arc<dyn StatusStore>,
        relay: Arc<dyn Relay>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            store,
            relay,
            topic: topic.into(),
            local: None,
        }
    }

    /// Deliver to this process's connections if the relay publish fails.
    pub fn with_local_fallback(mut self, broadcaster: Broadcaster) -> Self {
        self.local = Some(broadcaster);
        self
    }

    pub async fn execute(&self) -> ResetOutcome {
        let user_id = self.user_id;
        let current = match self.store.load_status(user_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "auto-reset skipped, user not loaded");
                return ResetOutcome::Abandoned;
            }
        };

        if current.status == PresenceStatus::Offline {
            tracing::info!(user_id = %user_id, "user offline, skipping auto-reset");
            return ResetOutcome::SkippedOffline;
        }

        let reset = StatusRecord {
            status: PresenceStatus::Available,
            is_manual: false,
            message: None,
            expiry: None,
        };
        if let Err(e) = self.store.save_status(user_id, reset).await {
            tracing::warn!(user_id = %user_id, error = %e, "auto-reset save failed");
            return ResetOutcome::Abandoned;
        }
        tracing::info!(user_id = %user_id, previous = %current.status, "status auto-reset to AVAILABLE");

        let event = PresenceEvent::status_update(user_id, PresenceStatus::Available, None);
        if let Err(e) = publish_event(self.relay.as_ref(), &self.topic, &event).await {
            tracing::warn!(user_id = %user_id, error = %e, relay = self.relay.name(), "auto-reset publish failed");
            if let Some(local) = &self.local {
                let delivered = local.send_all(&event);
                tracing::debug!(user_id = %user_id, delivered, "auto-reset delivered locally");
            }
        }
        ResetOutcome::Reset
    }
}

impl Job for StatusResetJob {
    fn name(&self) -> &'static str {
        "status_reset"
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.execute().await;
        })
    }
}

/// Entry point for `schedule_reset`.
#[derive(Clone)]
pub struct DeferredReset {
    scheduler: Arc<dyn JobScheduler>,
    store: Arc<dyn StatusStore>,
    relay: Arc<dyn Relay>,
    topic: String,
    local: Option<Broadcaster>,
}

impl DeferredReset {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        store: Arc<dyn StatusStore>,
        relay: Arc<dyn Relay>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            store,
            relay,
            topic: topic.into(),
            local: None,
        }
    }

    /// Jobs scheduled from here fall back to `broadcaster` when the relay
    /// publish fails.
    pub fn with_local_fallback(mut self, broadcaster: Broadcaster) -> Self {
        self.local = Some(broadcaster);
        self
    }

    pub fn schedule_reset(&self, user_id: UserId, delay: Duration) -> JobId {
        let mut job = StatusResetJob::new(
            user_id,
            Arc::clone(&self.store),
            Arc::clone(&self.relay),
            self.topic.clone(),
        );
        if let Some(local) = &self.local {
            job = job.with_local_fallback(local.clone());
        }
        self.scheduler.schedule(Box::new(job), delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::registry::ConnectionRegistry;
    use stackly_core::ChannelId;
    use stackly_relay::{MemoryRelay, RelayError, RelayStream, STATUS_TOPIC};
    use stackly_store::MemoryStatusStore;

    fn dnd() -> StatusRecord {
        StatusRecord {
            status: PresenceStatus::Dnd,
            is_manual: true,
            message: Some("focus".into()),
            expiry: Some(chrono::Utc::now()),
        }
    }

    #[tokio::test]
    async fn execute_resets_and_publishes() {
        let store = Arc::new(MemoryStatusStore::new());
        let relay = Arc::new(MemoryRelay::default());
        let user = UserId::new(7);
        store.insert_user(user);
        store.save_status(user, dnd()).await.unwrap();
        let mut sub = relay.subscribe(STATUS_TOPIC).await.unwrap();

        let job = StatusResetJob::new(user, store.clone(), relay.clone(), STATUS_TOPIC);
        assert_eq!(job.execute().await, ResetOutcome::Reset);

        let stored = store.status(user).unwrap();
        assert_eq!(stored.status, PresenceStatus::Available);
        assert!(!stored.is_manual);
        assert_eq!(stored.message, None);
        assert_eq!(stored.expiry, None);

        let payload = sub.next().await.unwrap().unwrap();
        let event: PresenceEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(event, PresenceEvent::status_update(user, PresenceStatus::Available, None));
    }

    struct DownRelay;

    #[async_trait::async_trait]
    impl Relay for DownRelay {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), RelayError> {
            Err(RelayError::Connect("connection refused".into()))
        }
        async fn subscribe(&self, _topic: &str) -> Result<RelayStream, RelayError> {
            Err(RelayError::Connect("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn failed_publish_falls_back_to_local_connections() {
        let store = Arc::new(MemoryStatusStore::new());
        let registry = Arc::new(ConnectionRegistry::new(8));
        let user = UserId::new(7);
        store.insert_user(user);
        store.save_status(user, dnd()).await.unwrap();
        let mut watcher = registry.add(UserId::new(8), ChannelId::room(1));

        let job = StatusResetJob::new(user, store.clone(), Arc::new(DownRelay), STATUS_TOPIC)
            .with_local_fallback(Broadcaster::new(registry));
        assert_eq!(job.execute().await, ResetOutcome::Reset);

        let frame = watcher.rx.try_recv().unwrap();
        assert_eq!(
            serde_json::from_str::<PresenceEvent>(&frame).unwrap(),
            PresenceEvent::status_update(user, PresenceStatus::Available, None)
        );
    }

    #[tokio::test]
    async fn successful_publish_skips_local_delivery() {
        let store = Arc::new(MemoryStatusStore::new());
        let registry = Arc::new(ConnectionRegistry::new(8));
        let user = UserId::new(7);
        store.insert_user(user);
        store.save_status(user, dnd()).await.unwrap();
        let mut watcher = registry.add(UserId::new(8), ChannelId::room(1));

        let job = StatusResetJob::new(
            user,
            store.clone(),
            Arc::new(MemoryRelay::default()),
            STATUS_TOPIC,
        )
        .with_local_fallback(Broadcaster::new(registry));
        assert_eq!(job.execute().await, ResetOutcome::Reset);
        assert!(watcher.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_user_is_left_alone() {
        let store = Arc::new(MemoryStatusStore::new());
        let relay = Arc::new(MemoryRelay::default());
        let user = UserId::new(7);
        store.insert_user(user);

        let job = StatusResetJob::new(user, store.clone(), relay, STATUS_TOPIC);
        assert_eq!(job.execute().await, ResetOutcome::SkippedOffline);
        assert_eq!(store.status(user), Some(StatusRecord::offline()));
    }

    #[tokio::test]
    async fn missing_user_is_abandoned() {
        let job = StatusResetJob::new(
            UserId::new(404),
            Arc::new(MemoryStatusStore::new()),
            Arc::new(MemoryRelay::default()),
            STATUS_TOPIC,
        );
        assert_eq!(job.execute().await, ResetOutcome::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reset_fires_after_delay() {
        let store = Arc::new(MemoryStatusStore::new());
        let relay: Arc<dyn Relay> = Arc::new(MemoryRelay::default());
        let scheduler = Arc::new(TokioScheduler::new());
        let reset = DeferredReset::new(scheduler.clone(), store.clone(), relay, STATUS_TOPIC);
        let user = UserId::new(3);
        store.insert_user(user);
        store.save_status(user, dnd()).await.unwrap();

        reset.schedule_reset(user, Duration::from_secs(60));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(store.status(user).unwrap().status, PresenceStatus::Dnd);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.status(user).unwrap().status, PresenceStatus::Available);
        assert_eq!(scheduler.pending(), 0);
    }
}
