//! Outbound events written to client connections and carried by the relay.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::status::PresenceStatus;

/// Reachability of a user, as seen by one server process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Global presence events, delivered to every connection.
///
/// The wire shape is identical whether the event was produced locally or
/// arrived over the relay. Consumers treat them as last-value-wins per user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PresenceEvent {
    #[serde(rename = "USER_STATUS_UPDATE")]
    StatusUpdate {
        user_id: UserId,
        status: PresenceStatus,
        message: Option<String>,
    },
    #[serde(rename = "USER_STATUS")]
    Connectivity {
        user_id: UserId,
        status: Connectivity,
    },
}

impl PresenceEvent {
    pub fn status_update(user_id: UserId, status: PresenceStatus, message: Option<String>) -> Self {
        Self::StatusUpdate {
            user_id,
            status,
            message,
        }
    }

    pub fn online(user_id: UserId) -> Self {
        Self::Connectivity {
            user_id,
            status: Connectivity::Online,
        }
    }

    pub fn offline(user_id: UserId) -> Self {
        Self::Connectivity {
            user_id,
            status: Connectivity::Offline,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Self::StatusUpdate { user_id, .. } | Self::Connectivity { user_id, .. } => *user_id,
        }
    }
}

/// Room-scoped events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    Typing { user_id: UserId, room_id: i64 },
    Pong,
}
