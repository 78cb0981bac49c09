//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"healthy"` while the server runs.
    pub status: String,
    pub uptime_secs: u64,
    /// Live connections on this process.
    pub connections: usize,
    /// Users with at least one live connection on this process.
    pub online_users: usize,
    /// False while running local-only.
    pub relay_connected: bool,
}

pub fn health_check(
    start_time: Instant,
    connections: usize,
    online_users: usize,
    relay_connected: bool,
) -> HealthResponse {
    HealthResponse {
        status: "healthy".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        online_users,
        relay_connected,
    }
}
