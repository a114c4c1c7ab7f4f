//! Live production board over WebSocket.
//!
//! Binary protocol, see wire.rs for the byte layout.
//!
//! - Client connects with `?token=<jwt>` (browsers can't set headers on WS),
//!   plus `&since=<revision>` when reconnecting
//! - Server sends: the events missed since that revision if the log still
//!   reaches back that far, otherwise a snapshot of the tasks this caller may
//!   see; then live events filtered through the same visibility rules
//! - A change that takes a task out of a client's view arrives as TASK_REVOKED
//! - Client sends: packed binary commands, applied under the caller's session

use crate::access::{self, Session};
use crate::auth::{self, SharedState};
use crate::wire;
use crate::world::{Event, World, WorldError};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    pub token: String,
    pub since: Option<u64>,
}

// ── WS upgrade handler ────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<LiveParams>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = auth::session_from_token(&state, &params.token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session.user_id, params.since)))
}

// ── Socket lifecycle ───────────────────────────────────────────

#[tracing::instrument(skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: SharedState, user_id: Uuid, since: Option<u64>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe BEFORE reading the world so nothing falls in between.
    let mut live_rx = state.live_tx.subscribe();

    let (caught_up, opening) = {
        let world = state.world();
        let Some(session) = world.session_for(user_id) else { return };
        catch_up(&world, &session, since)
    };

    for frame in opening {
        if ws_tx.send(Message::Binary(frame)).await.is_err() {
            return;
        }
    }
    tracing::debug!(revision = caught_up, "client connected");

    // Replies meant only for this client (rejections, decode errors).
    let (reply_tx, mut reply_rx) = mpsc::channel::<Vec<u8>>(16);

    let mut send_task = tokio::spawn({
        let state = state.clone();
        async move {
            loop {
                let frame = tokio::select! {
                    event = live_rx.recv() => match event {
                        // Already covered by the opening frames.
                        Ok(event) if event.revision() <= caught_up => continue,
                        Ok(event) => match frame_for(&state, user_id, &event) {
                            Some(frame) => frame,
                            None => continue,
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Too far behind to replay; the client must reconnect
                            // to get a fresh snapshot.
                            tracing::warn!(missed, "live client lagged, closing");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if ws_tx.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let state = state.clone();
        async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    Message::Binary(data) => {
                        if let Some(reply) = handle_command(&state, &data, user_id) {
                            if reply_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {} // ignore text, ping, pong
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!("client disconnected");
}

/// Frames that bring a client up to the current revision, and that revision.
/// Replays the missed events when the log still covers `since`, otherwise
/// sends a full snapshot.
fn catch_up(world: &World, session: &Session, since: Option<u64>) -> (u64, Vec<Vec<u8>>) {
    let missed = since
        .filter(|rev| *rev <= world.revision)
        .and_then(|rev| world.events_since(rev));

    let frames = match missed {
        Some(events) => events
            .iter()
            .filter_map(|(_, event)| pack_for_session(session, event))
            .collect(),
        None => {
            let visible: Vec<_> = world.visible_tasks(session).collect();
            vec![wire::pack_snapshot(world.revision, visible.into_iter())]
        }
    };
    (world.revision, frames)
}

/// Pack `event` for this recipient. The session is re-read so permission
/// changes take effect mid-connection.
fn frame_for(state: &SharedState, user_id: Uuid, event: &Event) -> Option<Vec<u8>> {
    let session = state.world().session_for(user_id)?;
    pack_for_session(&session, event)
}

/// The event itself if the recipient can read the task, a revoke notice if
/// this change took the task out of their view, otherwise nothing.
fn pack_for_session(session: &Session, event: &Event) -> Option<Vec<u8>> {
    if access::can_read(event.task(), Some(session)) {
        return Some(wire::pack_event(event));
    }
    event
        .previous()
        .is_some_and(|before| access::can_read(before, Some(session)))
        .then(|| wire::pack_revoked(event.revision(), event.task().id))
}

// ── Command processing ─────────────────────────────────────────

/// Decode, apply, flush, broadcast. Returns a frame for the sender only
/// when the command was refused.
fn handle_command(state: &SharedState, data: &[u8], user_id: Uuid) -> Option<Vec<u8>> {
    let cmd = match wire::unpack_command(data) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!(error = %e, "bad command from client");
            return Some(wire::pack_error(&e));
        }
    };

    let event = {
        let mut world = state.world_mut();
        let Some(session) = world.session_for(user_id) else {
            return Some(wire::pack_rejection(&WorldError::Forbidden));
        };
        match world.apply(cmd, &session, Utc::now()) {
            Ok(event) => {
                if let Err(e) = state.save_file.flush(&world, &event) {
                    tracing::error!(error = %e, revision = event.revision(), "save file flush failed");
                }
                event
            }
            Err(e) => {
                tracing::debug!(error = %e, "command rejected");
                return Some(wire::pack_rejection(&e));
            }
        }
    };

    tracing::debug!(revision = event.revision(), task = %event.task().id, "applied");
    // No receivers is fine: nobody else is connected.
    let _ = state.live_tx.send(event);
    None
}
