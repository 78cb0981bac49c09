use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post, put};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use stackly_presence::{
    Broadcaster, ConnectionRegistry, DeferredReset, PresenceManager, PresenceService, RelayHealth,
    RelayListener, TokioScheduler,
};
use stackly_relay::{ExponentialBackoff, Relay};
use stackly_settings::StacklySettings;
use stackly_store::{Database, SqliteStatusStore, StatusStore};

use crate::handlers;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceService,
    pub relay_health: RelayHealth,
    pub heartbeat_interval: Duration,
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/chat/online", get(handlers::online_users))
        .route("/chat/ws/{room_id}/{user_id}", get(handlers::room_socket))
        .route("/chat/ws/{user_id}", get(handlers::status_socket))
        .route("/users/{user_id}/status", put(handlers::set_status))
        .route("/meet/{meeting_id}/join", post(handlers::join_meeting))
        .route("/meet/{meeting_id}/leave", post(handlers::leave_meeting))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Wire the presence subsystem together for one process.
pub fn build_presence(
    settings: &StacklySettings,
    store: Arc<dyn StatusStore>,
    relay: Arc<dyn Relay>,
) -> PresenceService {
    let registry = Arc::new(ConnectionRegistry::new(settings.server.max_send_queue));
    let broadcaster = Broadcaster::new(registry);
    let manager = PresenceManager::new(Arc::clone(&store), broadcaster.clone());
    let reset = DeferredReset::new(
        Arc::new(TokioScheduler::new()),
        store,
        relay,
        settings.relay.topic.clone(),
    )
    .with_local_fallback(broadcaster);
    PresenceService::new(manager, reset, settings.presence.clone())
}

/// Create and start the server. Returns a handle to shut it down.
///
/// An unreachable relay does not fail startup: the listener logs, serves
/// local connections only and keeps retrying in the background.
pub async fn start(
    settings: StacklySettings,
    db: Database,
    relay: Arc<dyn Relay>,
) -> Result<ServerHandle, std::io::Error> {
    let store: Arc<dyn StatusStore> = Arc::new(SqliteStatusStore::new(db));
    let presence = build_presence(&settings, store, Arc::clone(&relay));
    let cancel = CancellationToken::new();

    let listener = RelayListener::new(
        relay,
        settings.relay.topic.clone(),
        presence.broadcaster().clone(),
        ExponentialBackoff::new(
            Duration::from_millis(settings.relay.initial_backoff_ms),
            Duration::from_millis(settings.relay.max_backoff_ms),
        ),
    );
    let relay_health = listener.health();
    let relay_task = listener.spawn(cancel.clone());

    let sweeper = presence.start_sweeper(
        settings.server.heartbeat_interval(),
        settings.server.client_timeout(),
    );

    let state = AppState {
        presence: presence.clone(),
        relay_health,
        heartbeat_interval: settings.server.heartbeat_interval(),
        start_time: Instant::now(),
    };
    let router = build_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let tcp = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = tcp.local_addr()?;

    tracing::info!(addr = %local_addr, topic = %settings.relay.topic, "stackly server started");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp, router)
            .with_graceful_shutdown(server_cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        presence,
        cancel,
        server,
        relay_task,
        sweeper,
    })
}

/// Handle returned by [`start`]; keeps background tasks alive.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    presence: PresenceService,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    relay_task: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    /// Stop the relay listener, drop every connection and stop serving.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.sweeper.abort();
        self.presence.registry().clear();

        if let Err(e) = self.relay_task.await {
            tracing::warn!(error = %e, "relay listener did not exit cleanly");
        }

        let mut server = self.server;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await.is_err() {
            tracing::warn!("server did not stop in time, aborting");
            server.abort();
        }
        tracing::info!("stackly server stopped");
    }
}
