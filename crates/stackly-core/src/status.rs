//! Presence status values and the persisted per-user status record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's presence status.
///
/// Each status carries a priority; a higher value is more authoritative.
/// The ordering only backs the manual-override guard, it is not a general
/// rule for which transitions are allowed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Available,
    Away,
    Brb,
    InMeeting,
    Dnd,
    Offline,
}

impl PresenceStatus {
    pub const ALL: [PresenceStatus; 6] = [
        Self::Available,
        Self::Away,
        Self::Brb,
        Self::InMeeting,
        Self::Dnd,
        Self::Offline,
    ];

    pub fn priority(self) -> u8 {
        match self {
            Self::Offline => 100,
            Self::Dnd => 90,
            Self::InMeeting => 80,
            Self::Brb => 50,
            Self::Away => 40,
            Self::Available => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Away => "AWAY",
            Self::Brb => "BRB",
            Self::InMeeting => "IN_MEETING",
            Self::Dnd => "DND",
            Self::Offline => "OFFLINE",
        }
    }

    /// AVAILABLE and OFFLINE never carry a status message.
    pub fn clears_message(self) -> bool {
        matches!(self, Self::Available | Self::Offline)
    }

    /// Statuses a user may pick for themselves. IN_MEETING is only ever
    /// inferred from joining a meeting.
    pub fn is_user_selectable(self) -> bool {
        !matches!(self, Self::InMeeting)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown presence status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PresenceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Persisted presence fields of one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: PresenceStatus,
    pub is_manual: bool,
    pub message: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// State of a freshly created user.
    pub fn offline() -> Self {
        Self {
            status: PresenceStatus::Offline,
            is_manual: false,
            message: None,
            expiry: None,
        }
    }

    /// True when the user explicitly chose do-not-disturb.
    pub fn is_manual_dnd(&self) -> bool {
        self.is_manual && self.status == PresenceStatus::Dnd
    }
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::offline()
    }
}

/// Why a requested status change was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StatusRejection {
    #[error("cannot change status while offline")]
    Offline,
    #[error("cannot override do-not-disturb")]
    DoNotDisturb,
}

impl StatusRejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::DoNotDisturb => "do_not_disturb",
        }
    }
}

/// Outcome of a status change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// The change was persisted; carries the stored record.
    Applied(StatusRecord),
    /// A guard refused the change. Nothing was mutated.
    Rejected(StatusRejection),
    /// The user could not be loaded or saved. Logged, nothing broadcast.
    Abandoned,
}

impl StatusChange {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn rejection(&self) -> Option<StatusRejection> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}
