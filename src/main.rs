use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use stackly_relay::{MemoryRelay, RedisRelay, Relay};
use stackly_settings::StacklySettings;
use stackly_store::{Database, UserRepo};
use stackly_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "stackly", about = "Presence and status propagation server")]
struct Cli {
    /// Settings file (defaults to ~/.stackly/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a user that starts OFFLINE.
    CreateUser {
        #[arg(long)]
        email: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => stackly_settings::load_settings_from_path(path),
        None => stackly_settings::load_settings(),
    }
    .context("failed to load settings")?;

    init_telemetry(&TelemetryConfig::from(&settings.logging))?;

    let db_path = settings.database.resolved_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    match cli.command {
        Command::Serve { port } => serve(settings, db, port).await,
        Command::CreateUser { email } => {
            let user = UserRepo::new(db).create(&email)?;
            println!("created user {} <{}>", user.id, user.email);
            Ok(())
        }
    }
}

async fn serve(
    mut settings: StacklySettings,
    db: Database,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }

    let relay = select_relay(&settings).await;
    let handle = stackly_server::start(settings, db, relay)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port(), "stackly ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Redis when enabled and the URL parses, otherwise an in-process relay
/// that only reaches this process. An unreachable Redis is still used: the
/// listener keeps retrying in the background.
async fn select_relay(settings: &StacklySettings) -> Arc<dyn Relay> {
    if !settings.relay.enabled {
        tracing::info!("relay disabled, presence updates stay local");
        return Arc::new(MemoryRelay::default());
    }
    match RedisRelay::new(&settings.relay.url) {
        Ok(relay) => {
            match relay.ping().await {
                Ok(()) => tracing::info!(url = %settings.relay.url, "relay reachable"),
                Err(e) => tracing::warn!(
                    error = %e,
                    url = %settings.relay.url,
                    "relay unreachable at startup, running local-only until it recovers"
                ),
            }
            Arc::new(relay)
        }
        Err(e) => {
            tracing::warn!(error = %e, url = %settings.relay.url, "invalid relay url, running local-only");
            Arc::new(MemoryRelay::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_settings(enabled: bool, url: &str) -> StacklySettings {
        let mut settings = StacklySettings::default();
        settings.relay.enabled = enabled;
        settings.relay.url = url.to_string();
        settings
    }

    #[tokio::test]
    async fn disabled_relay_stays_in_process() {
        let relay = select_relay(&relay_settings(false, "redis://127.0.0.1:1/0")).await;
        assert_eq!(relay.name(), "memory");
    }

    #[tokio::test]
    async fn invalid_url_falls_back_to_in_process() {
        let relay = select_relay(&relay_settings(true, "not a url")).await;
        assert_eq!(relay.name(), "memory");
    }

    #[tokio::test]
    async fn unreachable_redis_is_kept_for_retries() {
        let relay = select_relay(&relay_settings(true, "redis://127.0.0.1:1/0")).await;
        assert_eq!(relay.name(), "redis");
    }
}
