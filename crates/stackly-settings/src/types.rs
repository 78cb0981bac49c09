//! Settings types with compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StacklySettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub relay: RelaySettings,
    pub presence: PresenceSettings,
    pub logging: LoggingSettings,
}

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Outbound messages buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// A connection with no pong for this long is swept.
    pub client_timeout_secs: u64,
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

/// SQLite database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the database file. Relative paths resolve against `~/.stackly`.
    pub path: String,
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::stackly_home().join(path)
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "stackly.db".to_string(),
        }
    }
}

/// Cross-process pub/sub relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// When false the process runs with an in-process relay only.
    pub enabled: bool,
    /// Redis connection URL.
    pub url: String,
    /// Topic carrying presence updates.
    pub topic: String,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379/0".to_string(),
            topic: "status_updates".to_string(),
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

/// Presence behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Status message prefix used when a user joins a meeting.
    pub meeting_message_prefix: String,
    /// Base URL of meeting join links; the meeting id is appended.
    pub meeting_link_base: String,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            meeting_message_prefix: "In a Meeting".to_string(),
            meeting_link_base: "https://meet.jit.si/Stackly-Meeting-".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `[["stackly_relay", "debug"]]`.
    pub modules: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_resolution() {
        let relative = DatabaseSettings::default();
        assert!(relative.resolved_path().ends_with(".stackly/stackly.db"));

        let absolute = DatabaseSettings {
            path: "/var/lib/stackly/presence.db".into(),
        };
        assert_eq!(
            absolute.resolved_path(),
            PathBuf::from("/var/lib/stackly/presence.db")
        );
    }

    #[test]
    fn defaults() {
        let settings = StacklySettings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.max_send_queue, 256);
        assert_eq!(settings.relay.topic, "status_updates");
        assert_eq!(settings.relay.url, "redis://localhost:6379/0");
        assert!(settings.relay.enabled);
        assert_eq!(settings.presence.meeting_message_prefix, "In a Meeting");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(StacklySettings::default()).unwrap();
        assert!(value["server"].get("maxSendQueue").is_some());
        assert!(value["relay"].get("initialBackoffMs").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: StacklySettings =
            serde_json::from_str(r#"{"server": {"port": 9100}}"#).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.relay.topic, "status_updates");
    }

    #[test]
    fn durations() {
        let server = ServerSettings::default();
        assert_eq!(server.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(server.client_timeout(), Duration::from_secs(90));
    }
}
