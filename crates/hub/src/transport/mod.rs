// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the hub.

pub mod http;
pub mod ws;
pub mod ws_msg;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::HubState;

/// Build the axum `Router` with all hub routes.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        // Device sync protocol
        .route("/ws", get(ws::ws_handler))
        // Auth
        .route("/api/auth/login", post(http::login))
        // Liveness
        .route("/health", get(http::health))
        .route("/healthz", get(http::health))
        // Introspection (read-only)
        .route("/status", get(http::status))
        .route("/api/stats", get(http::stats))
        .route("/api/locks", get(http::locks_index))
        .route("/api/locks/{tenant}/{store}", get(http::locks_room))
        .route("/api/events", get(http::events_dump))
        // Middleware
        .layer(CorsLayer::permissive())
        .with_state(state)
}
