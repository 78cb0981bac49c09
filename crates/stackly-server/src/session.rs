use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use stackly_core::RoomEvent;
use stackly_presence::{Broadcaster, ConnectionHandle, NewConnection, PresenceService};

/// Frames a client may send. Anything else is ignored.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Typing,
    Ping,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    /// Typing notice fanned out to this many room members.
    Typing(usize),
    Pong,
    Ignored,
}

/// React to one inbound text frame.
pub(crate) fn handle_client_frame(
    broadcaster: &Broadcaster,
    conn: &ConnectionHandle,
    text: &str,
) -> FrameOutcome {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            tracing::trace!(connection_id = %conn.id, "ignoring client frame");
            return FrameOutcome::Ignored;
        }
    };

    match frame {
        ClientFrame::Typing => {
            let Some(room_id) = conn.channel.room_id() else {
                return FrameOutcome::Ignored;
            };
            let event = RoomEvent::Typing {
                user_id: conn.user_id,
                room_id,
            };
            FrameOutcome::Typing(broadcaster.send(&event, &conn.channel))
        }
        ClientFrame::Ping => match serde_json::to_string(&RoomEvent::Pong) {
            Ok(json) => {
                conn.try_deliver(&json);
                FrameOutcome::Pong
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode pong");
                FrameOutcome::Ignored
            }
        },
    }
}

/// Drive one WebSocket until either side ends, then disconnect it.
///
/// The writer drains the connection's send queue and pings every
/// `heartbeat`; the reader handles client frames and records pongs. The
/// registry dropping the connection (sweeper, shutdown) also ends the
/// session.
pub async fn run_session(
    socket: WebSocket,
    conn: NewConnection,
    service: PresenceService,
    heartbeat: Duration,
) {
    let NewConnection { handle, mut rx, .. } = conn;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = Arc::clone(&handle);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_conn.id, "sent ping");
                }
                _ = writer_conn.closed() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_conn = Arc::clone(&handle);
    let broadcaster = service.broadcaster().clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_client_frame(&broadcaster, &reader_conn, text.as_str());
                }
                WsMessage::Pong(_) => reader_conn.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    service.disconnect(&handle.id).await;
    tracing::info!(connection_id = %handle.id, user_id = %handle.user_id, "session ended");
}
