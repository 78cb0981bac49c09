//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::StacklySettings;

/// `~/.stackly`, falling back to `/tmp/.stackly` without a home directory.
pub fn stackly_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".stackly")
}

/// Resolve the path to the settings file (`~/.stackly/settings.json`).
pub fn settings_path() -> PathBuf {
    stackly_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StacklySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StacklySettings> {
    let defaults = serde_json::to_value(StacklySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StacklySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Reject values the server cannot run with.
pub fn validate(settings: &StacklySettings) -> Result<()> {
    let server = &settings.server;
    if server.max_send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxSendQueue must be > 0".into(),
        ));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be > 0".into(),
        ));
    }
    if server.client_timeout_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.clientTimeoutSecs must be > 0".into(),
        ));
    }
    Ok(())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup` (the process environment in
/// production). Invalid values are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut StacklySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = read("STACKLY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("STACKLY_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => tracing::warn!(key = "STACKLY_PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = read("STACKLY_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read("STACKLY_RELAY_ENABLED") {
        match parse_bool(&v) {
            Some(enabled) => settings.relay.enabled = enabled,
            None => tracing::warn!(key = "STACKLY_RELAY_ENABLED", value = %v, "invalid boolean, ignoring"),
        }
    }
    // REDIS_HOST is the worker-era variable; REDIS_URL wins when both exist.
    if let Some(host) = read("REDIS_HOST") {
        settings.relay.url = format!("redis://{host}:6379/0");
    }
    if let Some(v) = read("REDIS_URL") {
        settings.relay.url = v;
    }
    if let Some(v) = read("STACKLY_RELAY_TOPIC") {
        settings.relay.topic = v;
    }
    if let Some(v) = read("STACKLY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("STACKLY_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => tracing::warn!(key = "STACKLY_LOG_JSON", value = %v, "invalid boolean, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
