// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP side channel: login plus read-only liveness, stats, and debug dumps.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorBody, ErrorCode};
use crate::event::{AggregateType, Event, EventFilter};
use crate::locks::LockRecord;
use crate::state::HubState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub tenant_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<LoginData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: UserInfo,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
    pub email: String,
    pub tenant_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub connected_clients: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub leader_id: String,
    pub uptime_secs: u64,
    pub connected_clients: usize,
    pub clients: Vec<ClientInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub connection_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub cursor: u64,
    pub last_seen_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub connected_clients: usize,
    pub total_events: usize,
    pub last_lamport: u64,
    pub events_per_tenant: HashMap<String, usize>,
    pub events_per_type: HashMap<String, usize>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomLocksResponse {
    pub tenant_id: String,
    pub store_id: String,
    pub total: usize,
    pub active_locks: Vec<LockRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub tenant_id: Option<String>,
    pub store_id: Option<String>,
    pub aggregate_type: Option<AggregateType>,
    pub aggregate_id: Option<String>,
    pub from_lamport: Option<u64>,
    pub to_lamport: Option<u64>,
    pub from_time: Option<u64>,
    pub to_time: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsDumpResponse {
    pub total: usize,
    pub events: Vec<Event>,
}

/// Debug dump cap when the query does not name one.
const DUMP_LIMIT: usize = 500;

// -- Handlers -----------------------------------------------------------------

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<Arc<HubState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    match state.auth.login(&req.email, &req.password, &req.tenant_id) {
        Some(session) => {
            tracing::info!(user = %session.user_name, tenant = %session.tenant_id, "login");
            Json(LoginResponse {
                success: true,
                data: Some(LoginData {
                    user: UserInfo {
                        user_id: session.user_id.clone(),
                        user_name: session.user_name.clone(),
                        email: session.email.clone(),
                        tenant_id: session.tenant_id.clone(),
                    },
                    session: SessionInfo {
                        session_id: session.session_id,
                        created_at: session.created_at,
                    },
                }),
                error: None,
            })
            .into_response()
        }
        None => {
            tracing::warn!(email = %req.email, tenant = %req.tenant_id, "login refused");
            (
                StatusCode::UNAUTHORIZED,
                Json(LoginResponse {
                    success: false,
                    data: None,
                    error: Some(ErrorCode::LoginFailed.to_error_body("invalid credentials")),
                }),
            )
                .into_response()
        }
    }
}

/// `GET /health` and `GET /healthz`
pub async fn health(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_owned(),
        connected_clients: state.registry.connected_count(),
        uptime_secs: state.uptime_secs(),
    })
}

/// `GET /status` — connected peers with per-client cursors.
pub async fn status(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    let clients: Vec<ClientInfo> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|conn| {
            let session = conn.device_session();
            ClientInfo {
                connection_id: conn.id,
                device_id: session.as_ref().map(|s| s.device_id.clone()),
                tenant_id: session.as_ref().map(|s| s.tenant_id.clone()),
                store_id: session.as_ref().map(|s| s.store_id.clone()),
                user_id: session.and_then(|s| s.user_id),
                cursor: conn.cursor.load(std::sync::atomic::Ordering::Acquire),
                last_seen_ms: conn.last_seen_ms.load(std::sync::atomic::Ordering::Relaxed),
            }
        })
        .collect();

    Json(StatusResponse {
        leader_id: state.leader_id.clone(),
        uptime_secs: state.uptime_secs(),
        connected_clients: clients.len(),
        clients,
    })
}

/// `GET /api/stats`
pub async fn stats(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    let store = state.store.stats();
    Json(StatsResponse {
        connected_clients: state.registry.connected_count(),
        total_events: store.total_events,
        last_lamport: store.last_lamport,
        events_per_tenant: store.per_tenant,
        events_per_type: store.per_type,
        uptime_secs: state.uptime_secs(),
    })
}

/// `GET /api/locks` — global lock counters.
pub async fn locks_index(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    Json(state.locks.stats())
}

/// `GET /api/locks/{tenant}/{store}` — active locks for one room.
pub async fn locks_room(
    State(state): State<Arc<HubState>>,
    Path((tenant_id, store_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let active_locks = state.locks.get_active_locks(&tenant_id, &store_id);
    Json(RoomLocksResponse { tenant_id, store_id, total: active_locks.len(), active_locks })
}

/// `GET /api/events` — filtered event dump for debugging.
pub async fn events_dump(
    State(state): State<Arc<HubState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DUMP_LIMIT);
    let filter = EventFilter {
        tenant_id: query.tenant_id,
        store_id: query.store_id,
        aggregate_type: query.aggregate_type,
        aggregate_id: query.aggregate_id,
        from_lamport: query.from_lamport,
        to_lamport: query.to_lamport,
        from_time: query.from_time,
        to_time: query.to_time,
    };

    let mut events: Vec<Event> =
        state.store.get_events(&filter).iter().map(|e| (**e).clone()).collect();
    events.truncate(limit);
    Json(EventsDumpResponse { total: events.len(), events })
}
