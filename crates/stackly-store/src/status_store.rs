//! Async access to the persisted presence fields.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stackly_core::{StatusRecord, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::users::UserRepo;

/// Storage collaborator of the presence subsystem.
///
/// No isolation stronger than a single row write is offered: two callers
/// doing load → modify → save for the same user race, and the last save wins.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn load_status(&self, user_id: UserId) -> Result<StatusRecord, StoreError>;
    async fn save_status(&self, user_id: UserId, record: StatusRecord) -> Result<(), StoreError>;
    async fn record_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// [`StatusStore`] backed by SQLite. Every call runs on Tokio's blocking
/// pool so the async workers never wait on disk I/O.
#[derive(Clone)]
pub struct SqliteStatusStore {
    repo: Arc<UserRepo>,
}

impl SqliteStatusStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: Arc::new(UserRepo::new(db)),
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&UserRepo) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo)).await?
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn load_status(&self, user_id: UserId) -> Result<StatusRecord, StoreError> {
        self.blocking(move |repo| repo.load_status(user_id)).await
    }

    async fn save_status(&self, user_id: UserId, record: StatusRecord) -> Result<(), StoreError> {
        self.blocking(move |repo| repo.save_status(user_id, &record)).await
    }

    async fn record_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.blocking(move |repo| repo.record_last_seen(user_id, at)).await
    }
}
