//! REST handlers for presence.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use stackly_core::{ChannelId, PresenceStatus, StatusChange, UserId};

use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::server::AppState;
use crate::session;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Minutes until the status reverts to AVAILABLE.
    #[serde(default)]
    pub duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMeetingRequest {
    pub user_id: UserId,
}

/// Parse a status a user may pick by hand.
fn parse_selectable(raw: &str) -> Result<PresenceStatus, ApiError> {
    raw.parse::<PresenceStatus>()
        .ok()
        .filter(|status| status.is_user_selectable())
        .ok_or_else(|| ApiError::BadRequest("Invalid status".into()))
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.presence.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.list_online_users().len(),
        state.relay_health.is_connected(),
    ))
}

/// GET /chat/online
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<UserId>> {
    Json(state.presence.online_users())
}

/// PUT /users/{user_id}/status
pub async fn set_status(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = UserId::new(user_id);
    let status = parse_selectable(&body.status)?;
    let minutes = body
        .duration
        .and_then(|d| u32::try_from(d).ok())
        .filter(|d| *d > 0);

    let result = state
        .presence
        .set_manual_status(user_id, status, body.message, minutes)
        .await;

    match (result.change, result.expires_at, minutes) {
        (StatusChange::Applied(_), Some(expires_at), Some(minutes)) => Ok(Json(json!({
            "message": format!("Status set to {status}. Will reset in {minutes} minutes."),
            "expiresAt": expires_at,
        }))),
        (StatusChange::Applied(_), _, _) => Ok(Json(json!({
            "message": format!("Status updated to {status}"),
        }))),
        (StatusChange::Rejected(reason), _, _) => Err(ApiError::Rejected(reason)),
        (StatusChange::Abandoned, _, _) => Err(ApiError::NotFound("User not found".into())),
    }
}

/// POST /meet/{meeting_id}/join
pub async fn join_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    Json(body): Json<JoinMeetingRequest>,
) -> Json<Value> {
    let join = state
        .presence
        .join_meeting(body.user_id, &meeting_id, body.title.as_deref())
        .await;
    let message = match &join.change {
        StatusChange::Applied(_) => format!("Status updated to {}", PresenceStatus::InMeeting),
        StatusChange::Rejected(reason) => format!("Status unchanged: {reason}"),
        StatusChange::Abandoned => "Status unchanged".to_string(),
    };
    Json(json!({ "message": message, "link": join.link }))
}

/// POST /meet/{meeting_id}/leave
pub async fn leave_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    Json(body): Json<LeaveMeetingRequest>,
) -> Json<Value> {
    let change = state.presence.leave_meeting(body.user_id).await;
    tracing::debug!(meeting_id = %meeting_id, user_id = %body.user_id, applied = change.is_applied(), "left meeting");
    let message = match change {
        StatusChange::Applied(_) => "You are now marked as AVAILABLE".to_string(),
        StatusChange::Rejected(reason) => format!("Status unchanged: {reason}"),
        StatusChange::Abandoned => "Status unchanged".to_string(),
    };
    Json(json!({ "message": message }))
}

/// GET /chat/ws/{room_id}/{user_id}
pub async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    upgrade(ws, state, UserId::new(user_id), ChannelId::room(room_id))
}

/// GET /chat/ws/{user_id}
pub async fn status_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let user_id = UserId::new(user_id);
    upgrade(ws, state, user_id, ChannelId::user(user_id))
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    user_id: UserId,
    channel: ChannelId,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let conn = state.presence.connect(user_id, channel).await;
        session::run_session(socket, conn, state.presence, state.heartbeat_interval).await;
    })
}
