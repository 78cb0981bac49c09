use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stackly_core::{PresenceStatus, StatusRecord, UserId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub status: StatusRecord,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: String,
}

const USER_COLUMNS: &str =
    "id, email, current_status, is_manually_set, status_message, status_expiry, last_seen, created_at";

/// Raw column values; converted to [`UserRow`] outside the rusqlite closure so
/// bad stored values surface as [`StoreError::InvalidData`].
struct RawUser {
    id: i64,
    email: String,
    status: String,
    is_manual: bool,
    message: Option<String>,
    expiry: Option<String>,
    last_seen: Option<String>,
    created_at: String,
}

impl RawUser {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            status: row.get(2)?,
            is_manual: row.get(3)?,
            message: row.get(4)?,
            expiry: row.get(5)?,
            last_seen: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_user(self) -> Result<UserRow, StoreError> {
        let status: PresenceStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("user {}: {e}", self.id)))?;
        Ok(UserRow {
            id: UserId::new(self.id),
            email: self.email,
            status: StatusRecord {
                status,
                is_manual: self.is_manual,
                message: self.message,
                expiry: parse_timestamp(self.expiry)?,
            },
            last_seen: parse_timestamp(self.last_seen)?,
            created_at: self.created_at,
        })
    }
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::InvalidData(format!("timestamp {s}: {e}")))
    })
    .transpose()
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. New users start OFFLINE with no message or expiry.
    #[instrument(skip(self))]
    pub fn create(&self, email: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let initial = StatusRecord::offline();
            conn.execute(
                "INSERT INTO users (email, current_status, is_manually_set, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![email, initial.status.as_str(), initial.is_manual, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("user {email} already exists"))
                }
                other => StoreError::from(other),
            })?;

            Ok(UserRow {
                id: UserId::new(conn.last_insert_rowid()),
                email: email.to_string(),
                status: initial,
                last_seen: None,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserRow, StoreError> {
        let raw = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.get()],
                RawUser::from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })?;
        raw.ok_or_else(|| StoreError::NotFound(format!("user {id}")))?
            .into_user()
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<UserRow>, StoreError> {
        let raws = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], RawUser::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        raws.into_iter().map(RawUser::into_user).collect()
    }

    pub fn load_status(&self, id: UserId) -> Result<StatusRecord, StoreError> {
        self.get(id).map(|user| user.status)
    }

    #[instrument(skip(self, record), fields(user_id = %id, status = %record.status))]
    pub fn save_status(&self, id: UserId, record: &StatusRecord) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET current_status = ?1, is_manually_set = ?2, status_message = ?3, status_expiry = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    record.status.as_str(),
                    record.is_manual,
                    record.message,
                    record.expiry.map(|t| t.to_rfc3339()),
                    id.get(),
                ],
            )
            .map_err(StoreError::from)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn record_last_seen(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), id.get()],
            )
            .map_err(StoreError::from)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn repo() -> UserRepo {
        UserRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn created_user_starts_offline() {
        let repo = repo();
        let user = repo.create("ada@example.com").unwrap();
        assert_eq!(user.status, StatusRecord::offline());

        let loaded = repo.get(user.id).unwrap();
        assert_eq!(loaded.email, "ada@example.com");
        assert_eq!(loaded.status.status, PresenceStatus::Offline);
        assert!(loaded.last_seen.is_none());
    }

    #[test]
    fn duplicate_email_conflicts() {
        let repo = repo();
        repo.create("ada@example.com").unwrap();
        let err = repo.create("ada@example.com").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got: {err}");
    }

    #[test]
    fn save_and_load_status_roundtrip() {
        let repo = repo();
        let user = repo.create("grace@example.com").unwrap();
        let expiry = Utc::now() + Duration::minutes(30);
        let record = StatusRecord {
            status: PresenceStatus::Dnd,
            is_manual: true,
            message: Some("focus time".into()),
            expiry: Some(expiry),
        };
        repo.save_status(user.id, &record).unwrap();

        let loaded = repo.load_status(user.id).unwrap();
        assert_eq!(loaded.status, PresenceStatus::Dnd);
        assert!(loaded.is_manual);
        assert_eq!(loaded.message.as_deref(), Some("focus time"));
        assert_eq!(
            loaded.expiry.map(|t| t.timestamp()),
            Some(expiry.timestamp())
        );
    }

    #[test]
    fn unknown_user_is_not_found() {
        let repo = repo();
        assert!(matches!(
            repo.load_status(UserId::new(404)),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.save_status(UserId::new(404), &StatusRecord::offline()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.record_last_seen(UserId::new(404), Utc::now()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn last_seen_recorded() {
        let repo = repo();
        let user = repo.create("linus@example.com").unwrap();
        let at = Utc::now();
        repo.record_last_seen(user.id, at).unwrap();
        let loaded = repo.get(user.id).unwrap();
        assert_eq!(loaded.last_seen.map(|t| t.timestamp()), Some(at.timestamp()));
    }

    #[test]
    fn corrupt_status_is_invalid_data() {
        let db = Database::in_memory().unwrap();
        let repo = UserRepo::new(db.clone());
        let user = repo.create("bad@example.com").unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET current_status = 'BUSY' WHERE id = ?1",
                [user.id.get()],
            )
            .map_err(StoreError::from)
        })
        .unwrap();
        assert!(matches!(repo.get(user.id), Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn list_in_creation_order() {
        let repo = repo();
        let a = repo.create("a@example.com").unwrap();
        let b = repo.create("b@example.com").unwrap();
        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
