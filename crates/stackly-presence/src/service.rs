use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use stackly_core::{
    ChannelId, ConnectionId, JobId, PresenceEvent, PresenceStatus, StatusChange, UserId,
};
use stackly_settings::PresenceSettings;
use stackly_store::StatusStore;

use crate::fanout::Broadcaster;
use crate::registry::{ConnectionRegistry, NewConnection, Registration, Removal};
use crate::reset::DeferredReset;
use crate::state_machine::PresenceManager;

/// Result of a manual status request.
#[derive(Clone, Debug)]
pub struct ManualStatus {
    pub change: StatusChange,
    /// Set when a duration was given and the change applied.
    pub expires_at: Option<DateTime<Utc>>,
    pub reset_job: Option<JobId>,
}

#[derive(Clone, Debug)]
pub struct MeetingJoin {
    pub change: StatusChange,
    pub link: String,
}

/// Presence flows triggered by client actions: connect, disconnect, manual
/// status, meetings.
#[derive(Clone)]
pub struct PresenceService {
    registry: Arc<ConnectionRegistry>,
    manager: PresenceManager,
    reset: DeferredReset,
    settings: PresenceSettings,
}

impl PresenceService {
    pub fn new(manager: PresenceManager, reset: DeferredReset, settings: PresenceSettings) -> Self {
        Self {
            registry: Arc::clone(manager.broadcaster().registry()),
            manager,
            reset,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.manager.broadcaster()
    }

    pub fn manager(&self) -> &PresenceManager {
        &self.manager
    }

    /// Register a connection. The user's first live connection announces
    /// them online and asks for AVAILABLE.
    pub async fn connect(&self, user_id: UserId, channel: ChannelId) -> NewConnection {
        let conn = self.registry.add(user_id, channel);
        tracing::info!(
            user_id = %user_id,
            connection_id = %conn.handle.id,
            channel = %conn.handle.channel,
            "client connected"
        );

        if conn.registration == Registration::FirstConnection {
            self.broadcaster().send_all(&PresenceEvent::online(user_id));
            self.manager
                .request_status_change(user_id, PresenceStatus::Available, None, false)
                .await;
        }
        conn
    }

    /// Drop a connection. Idempotent; the user's last connection records
    /// last-seen, announces them offline and asks for OFFLINE. A manual
    /// DND refuses that request and stays in place.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Removal {
        let removal = self.registry.remove(connection_id);
        if let Removal::LastConnection(user_id) = removal {
            tracing::info!(user_id = %user_id, connection_id = %connection_id, "user went offline");
            if let Err(e) = self
                .manager
                .store()
                .record_last_seen(user_id, Utc::now())
                .await
            {
                tracing::warn!(user_id = %user_id, error = %e, "failed to record last seen");
            }
            self.broadcaster().send_all(&PresenceEvent::offline(user_id));
            self.manager
                .request_status_change(user_id, PresenceStatus::Offline, None, false)
                .await;
        }
        removal
    }

    /// Explicit status choice by the user. With a positive duration the
    /// expiry is stored and a reset back to AVAILABLE is scheduled.
    pub async fn set_manual_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        message: Option<String>,
        duration_minutes: Option<u32>,
    ) -> ManualStatus {
        let change = self
            .manager
            .request_status_change(user_id, status, message, true)
            .await;

        let minutes = duration_minutes.unwrap_or(0);
        let mut record = match change {
            StatusChange::Applied(record) if minutes > 0 => record,
            other => {
                return ManualStatus {
                    change: other,
                    expires_at: None,
                    reset_job: None,
                }
            }
        };

        let expires_at = Utc::now() + chrono::Duration::minutes(i64::from(minutes));
        record.expiry = Some(expires_at);
        if let Err(e) = self.manager.store().save_status(user_id, record.clone()).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to store status expiry");
        }

        let job = self
            .reset
            .schedule_reset(user_id, Duration::from_secs(u64::from(minutes) * 60));
        tracing::info!(user_id = %user_id, %status, minutes, job_id = %job, "status reset scheduled");

        ManualStatus {
            change: StatusChange::Applied(record),
            expires_at: Some(expires_at),
            reset_job: Some(job),
        }
    }

    pub fn meeting_link(&self, meeting_id: &str) -> String {
        format!("{}{}", self.settings.meeting_link_base, meeting_id)
    }

    pub async fn join_meeting(
        &self,
        user_id: UserId,
        meeting_id: &str,
        title: Option<&str>,
    ) -> MeetingJoin {
        let prefix = &self.settings.meeting_message_prefix;
        let message = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => format!("{prefix}: {title}"),
            None => prefix.clone(),
        };
        let change = self
            .manager
            .request_status_change(user_id, PresenceStatus::InMeeting, Some(message), false)
            .await;
        MeetingJoin {
            change,
            link: self.meeting_link(meeting_id),
        }
    }

    pub async fn leave_meeting(&self, user_id: UserId) -> StatusChange {
        self.manager
            .request_status_change(user_id, PresenceStatus::Available, None, false)
            .await
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.registry.list_online_users()
    }

    /// Disconnect every connection that stopped answering pings.
    pub async fn sweep_dead_connections(&self, timeout: Duration) -> usize {
        let dead = self.registry.dead_connections(timeout);
        let mut removed = 0;
        for id in dead {
            if self.disconnect(&id).await != Removal::NotRegistered {
                removed += 1;
                tracing::info!(connection_id = %id, "cleaned up dead connection");
            }
        }
        removed
    }

    /// Periodic dead-connection cleanup.
    pub fn start_sweeper(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = service.sweep_dead_connections(timeout).await;
                if removed > 0 {
                    tracing::info!(removed, "dead connection cleanup");
                }
            }
        })
    }
}
