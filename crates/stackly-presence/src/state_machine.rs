//! Priority-guarded presence transitions.
//!
//! Every status mutation that originates from a client action goes through
//! [`PresenceManager::request_status_change`]. The read-modify-write against
//! the store is not isolated: two concurrent requests for the same user race
//! and the last save wins. Consumers treat presence events as last-value-wins
//! per user, so no per-user lock is taken here.

use std::sync::Arc;

use tracing::instrument;

use stackly_core::{PresenceEvent, PresenceStatus, StatusChange, StatusRecord, StatusRejection, UserId};
use stackly_store::StatusStore;

use crate::fanout::Broadcaster;

/// Check the two guards against the currently stored record.
pub fn check_guards(
    current: &StatusRecord,
    requested: PresenceStatus,
    is_manual: bool,
) -> Option<StatusRejection> {
    if current.status == PresenceStatus::Offline
        && !matches!(requested, PresenceStatus::Available | PresenceStatus::Offline)
    {
        return Some(StatusRejection::Offline);
    }
    if current.is_manual_dnd() && !is_manual {
        return Some(StatusRejection::DoNotDisturb);
    }
    None
}

/// Apply an accepted change to the record. The expiry is left alone.
pub fn apply_change(
    record: &mut StatusRecord,
    requested: PresenceStatus,
    message: Option<&str>,
    is_manual: bool,
) {
    record.status = requested;
    record.is_manual = is_manual;
    if requested.clears_message() {
        record.message = None;
    } else if let Some(message) = message {
        record.message = Some(message.to_string());
    }
}

#[derive(Clone)]
pub struct PresenceManager {
    store: Arc<dyn StatusStore>,
    broadcaster: Broadcaster,
}

impl PresenceManager {
    pub fn new(store: Arc<dyn StatusStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Load, guard, mutate, persist, then notify every local connection.
    ///
    /// Guard rejections come back as [`StatusChange::Rejected`]. Storage
    /// failures are logged and reported as [`StatusChange::Abandoned`];
    /// nothing is broadcast in either case.
    #[instrument(skip_all, fields(user_id = %user_id, status = %new_status, is_manual = is_manual))]
    pub async fn request_status_change(
        &self,
        user_id: UserId,
        new_status: PresenceStatus,
        message: Option<String>,
        is_manual: bool,
    ) -> StatusChange {
        let mut record = match self.store.load_status(user_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "status change abandoned, user not loaded");
                return StatusChange::Abandoned;
            }
        };

        if let Some(reason) = check_guards(&record, new_status, is_manual) {
            tracing::debug!(current = %record.status, reason = reason.code(), "status change rejected");
            return StatusChange::Rejected(reason);
        }

        apply_change(&mut record, new_status, message.as_deref(), is_manual);

        if let Err(e) = self.store.save_status(user_id, record.clone()).await {
            tracing::warn!(error = %e, "status change abandoned, save failed");
            return StatusChange::Abandoned;
        }

        tracing::info!(message = ?record.message, "status changed");
        let delivered = self
            .broadcaster
            .send_all(&PresenceEvent::status_update(user_id, new_status, message));
        tracing::debug!(delivered, "status update broadcast");

        StatusChange::Applied(record)
    }
}
