// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket session handler.
//!
//! One task per device connection. All hub-to-client traffic (direct
//! replies, relays, lock broadcasts) goes through the connection's outbound
//! queue, so a slow socket never blocks a broadcaster and per-connection
//! ordering is the enqueue order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::error::ErrorCode;
use crate::locks::AcquireResult;
use crate::state::{epoch_ms, ClientConn, DeviceSession, HubState};
use crate::transport::ws_msg::{ClientMessage, ServerMessage};

/// Short-circuit: commands before a valid `hello` get an auth error.
macro_rules! require_registered {
    ($conn:expr) => {
        match $conn.device_session() {
            Some(session) => session,
            None => {
                return Some(ws_error(ErrorCode::NotAuthenticated, "hello required first"));
            }
        }
    };
}

/// `GET /ws` — WebSocket upgrade for device connections.
pub async fn ws_handler(
    State(state): State<Arc<HubState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Per-connection event loop.
async fn handle_connection(state: Arc<HubState>, socket: WebSocket) {
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = state.registry.register(outbound_tx);
    tracing::debug!(conn = conn.id, "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            // Hub -> client: drain the outbound queue.
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if send_json(&mut ws_tx, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Client -> hub.
            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };

                match message {
                    Message::Text(text) => {
                        conn.touch();
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                conn.send(ws_error(ErrorCode::BadRequest, "invalid message"));
                                continue;
                            }
                        };
                        if let Some(reply) = handle_client_message(&state, &conn, client_msg) {
                            conn.send(reply);
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    disconnect(&state, &conn);
}

/// Handle a single client message and optionally return a direct reply.
/// Handlers that emit multiple frames (hello replay) enqueue them directly.
fn handle_client_message(
    state: &HubState,
    conn: &Arc<ClientConn>,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Hello { device_id, tenant_id, store_id, cursor, auth } => {
            if device_id.is_empty() || tenant_id.is_empty() || store_id.is_empty() {
                return Some(ws_error(
                    ErrorCode::InvalidHello,
                    "deviceId, tenantId and storeId are required",
                ));
            }

            // Login session is optional: displays connect unauthenticated. A
            // session from another tenant is ignored rather than fatal.
            let user = auth
                .and_then(|auth| state.auth.resolve(&auth.session_id))
                .filter(|session| session.tenant_id == tenant_id);

            let session = DeviceSession {
                device_id: device_id.clone(),
                tenant_id,
                store_id,
                user_id: user.as_ref().map(|u| u.user_id.clone()),
                user_name: user.as_ref().map(|u| u.user_name.clone()),
            };
            let cursor = cursor.unwrap_or(0);
            conn.register_session(session.clone(), cursor);
            tracing::info!(
                conn = conn.id,
                device = %device_id,
                room = %session.room_key(),
                cursor,
                "device registered"
            );

            conn.send(ServerMessage::HelloAck {
                leader_id: state.leader_id.clone(),
                server_time: epoch_ms(),
                snapshot_needed: false,
            });
            replay(state, conn, &session, cursor, false);
            None
        }

        ClientMessage::EventsAppend { event } => {
            let session = require_registered!(conn);
            if event.tenant_id != session.tenant_id || event.store_id != session.store_id {
                tracing::warn!(
                    conn = conn.id,
                    device = %session.device_id,
                    event_room = %event.room_key(),
                    "cross-room append rejected"
                );
                return Some(ws_error(ErrorCode::Unauthorized, "event outside registered room"));
            }

            let lamport = event.clock.lamport;
            match state.append_and_relay(event) {
                Ok(true) => {
                    conn.advance_cursor(lamport);
                    None
                }
                // Duplicate eventId: idempotent no-op, no relay, no error.
                Ok(false) => None,
                Err(err) => Some(ws_error(ErrorCode::InvalidEvent, err.to_string())),
            }
        }

        ClientMessage::CursorRequest { from_lamport } => {
            let session = require_registered!(conn);
            replay(state, conn, &session, from_lamport, true);
            None
        }

        ClientMessage::LockRequest { order_id, tenant_id, store_id } => {
            let session = require_registered!(conn);
            if let Some(err) = check_room(&session, &tenant_id, &store_id) {
                return Some(err);
            }

            match state.locks.acquire(
                &tenant_id,
                &store_id,
                &order_id,
                &session.device_id,
                session.user_id.clone(),
                session.user_name.clone(),
            ) {
                AcquireResult::Granted(lock) => {
                    state.broadcast_room(
                        &lock.room_key(),
                        &ServerMessage::OrderLocked {
                            order_id: order_id.clone(),
                            device_id: lock.device_id.clone(),
                            user_name: lock.user_name.clone(),
                            acquired_at: lock.acquired_at,
                        },
                        Some(conn.id),
                    );
                    Some(ServerMessage::LockResponse {
                        order_id,
                        success: true,
                        lock: Some(lock),
                        reason: None,
                    })
                }
                AcquireResult::Held(holder) => Some(ServerMessage::LockResponse {
                    order_id,
                    success: false,
                    reason: Some(format!("held_by:{}", holder.device_id)),
                    lock: Some(holder),
                }),
            }
        }

        ClientMessage::LockRenew { order_id, tenant_id, store_id } => {
            let session = require_registered!(conn);
            if let Some(err) = check_room(&session, &tenant_id, &store_id) {
                return Some(err);
            }

            let renewed = state.locks.renew(&tenant_id, &store_id, &order_id, &session.device_id);
            Some(ServerMessage::LockRenewed {
                order_id,
                success: renewed.is_some(),
                expires_at: renewed.map(|lock| lock.expires_at),
            })
        }

        ClientMessage::LockRelease { order_id, tenant_id, store_id } => {
            let session = require_registered!(conn);
            if let Some(err) = check_room(&session, &tenant_id, &store_id) {
                return Some(err);
            }

            let released =
                state.locks.release(&tenant_id, &store_id, &order_id, &session.device_id);
            if released {
                state.broadcast_room(
                    &session.room_key(),
                    &ServerMessage::LockReleased {
                        order_id: order_id.clone(),
                        device_id: session.device_id.clone(),
                        success: None,
                        reason: "manual_release".to_owned(),
                    },
                    None,
                );
            }
            Some(ServerMessage::LockReleased {
                order_id,
                device_id: session.device_id,
                success: Some(released),
                reason: "manual_release".to_owned(),
            })
        }

        ClientMessage::LockStatus { order_id, tenant_id, store_id } => {
            let session = require_registered!(conn);
            if let Some(err) = check_room(&session, &tenant_id, &store_id) {
                return Some(err);
            }

            let lock = state.locks.get_lock_status(&tenant_id, &store_id, &order_id);
            Some(ServerMessage::LockStatusResponse { order_id, is_locked: lock.is_some(), lock })
        }

        ClientMessage::Ping {} => Some(ServerMessage::Pong {}),
    }
}

/// Lock payloads carry the room so the key is explicit on the wire, but only
/// the connection's own room is accepted.
fn check_room(session: &DeviceSession, tenant_id: &str, store_id: &str) -> Option<ServerMessage> {
    if session.tenant_id != tenant_id || session.store_id != store_id {
        return Some(ws_error(ErrorCode::Unauthorized, "lock outside registered room"));
    }
    None
}

/// Send the room's tail past `from_lamport` as `events.bulk` frames, chunked
/// at the configured batch size. `hello` replay stays silent when there is
/// nothing pending; an explicit `cursor.request` always gets at least one
/// frame so clients can complete a sync round-trip.
fn replay(
    state: &HubState,
    conn: &Arc<ClientConn>,
    session: &DeviceSession,
    from_lamport: u64,
    always_reply: bool,
) {
    let pending =
        state.store.room_events_after(&session.tenant_id, &session.store_id, from_lamport);

    if pending.is_empty() {
        if always_reply {
            conn.send(ServerMessage::EventsBulk {
                events: Vec::new(),
                from_lamport,
                to_lamport: from_lamport,
            });
        }
        return;
    }

    let mut frame_from = from_lamport;
    for chunk in pending.chunks(state.config.replay_batch.max(1)) {
        let to_lamport = chunk.last().map(|e| e.clock.lamport).unwrap_or(frame_from);
        conn.send(ServerMessage::EventsBulk {
            events: chunk.iter().map(|e| (**e).clone()).collect(),
            from_lamport: frame_from,
            to_lamport,
        });
        frame_from = to_lamport;
    }
    conn.advance_cursor(frame_from);
    tracing::debug!(
        conn = conn.id,
        device = %session.device_id,
        events = pending.len(),
        "replayed pending events"
    );
}

/// Runs exactly once per connection: the select loop has a single exit.
fn disconnect(state: &HubState, conn: &Arc<ClientConn>) {
    state.registry.remove(conn.id);

    let Some(session) = conn.device_session() else {
        tracing::debug!(conn = conn.id, "unregistered connection closed");
        return;
    };

    let released = state.locks.release_device_locks(&session.device_id);
    for lock in &released {
        state.broadcast_room(
            &lock.room_key(),
            &ServerMessage::LockReleased {
                order_id: lock.aggregate_id.clone(),
                device_id: lock.device_id.clone(),
                success: None,
                reason: "device_disconnected".to_owned(),
            },
            None,
        );
    }
    tracing::info!(
        conn = conn.id,
        device = %session.device_id,
        released = released.len(),
        "device disconnected"
    );
}

/// Send a JSON-serialized message over the WebSocket.
async fn send_json<S>(tx: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn ws_error(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error { code: code.as_str().to_owned(), message: message.into() }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
