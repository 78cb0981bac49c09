use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use stackly_core::{StatusRecord, UserId};

use crate::error::StoreError;
use crate::status_store::StatusStore;

#[derive(Clone, Debug, Default)]
struct Entry {
    status: StatusRecord,
    last_seen: Option<DateTime<Utc>>,
}

/// [`StatusStore`] kept in a process-local map. Never touches a thread
/// pool, so it behaves deterministically under paused Tokio time.
#[derive(Default)]
pub struct MemoryStatusStore {
    users: Mutex<HashMap<UserId, Entry>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user in the initial OFFLINE state.
    pub fn insert_user(&self, user_id: UserId) {
        self.users.lock().insert(user_id, Entry::default());
    }

    pub fn status(&self, user_id: UserId) -> Option<StatusRecord> {
        self.users.lock().get(&user_id).map(|e| e.status.clone())
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.users.lock().get(&user_id).and_then(|e| e.last_seen)
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load_status(&self, user_id: UserId) -> Result<StatusRecord, StoreError> {
        self.status(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }

    async fn save_status(&self, user_id: UserId, record: StatusRecord) -> Result<(), StoreError> {
        let mut users = self.users.lock();
        let entry = users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        entry.status = record;
        Ok(())
    }

    async fn record_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut users = self.users.lock();
        let entry = users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        entry.last_seen = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackly_core::PresenceStatus;

    #[tokio::test]
    async fn behaves_like_the_sqlite_store() {
        let store = MemoryStatusStore::new();
        let user = UserId::new(1);
        assert!(matches!(store.load_status(user).await, Err(StoreError::NotFound(_))));

        store.insert_user(user);
        assert_eq!(store.load_status(user).await.unwrap(), StatusRecord::offline());

        let mut record = StatusRecord::offline();
        record.status = PresenceStatus::Away;
        store.save_status(user, record.clone()).await.unwrap();
        assert_eq!(store.status(user), Some(record));

        store.record_last_seen(user, Utc::now()).await.unwrap();
        assert!(store.last_seen(user).is_some());
        assert!(store.save_status(UserId::new(2), StatusRecord::offline()).await.is_err());
    }
}
