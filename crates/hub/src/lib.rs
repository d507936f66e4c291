// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tillsync: LAN synchronization hub for multi-device POS deployments.
//!
//! Cashier terminals, kitchen/bar displays, and manager tablets connect over
//! WebSocket, exchange append-only domain events through an authoritative
//! Lamport-ordered in-memory log, and coordinate edit rights with per-order
//! pessimistic locks. Devices returning from a disconnect catch up from their
//! cursor.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod locks;
pub mod state;
pub mod store;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::config::HubConfig;
use crate::state::HubState;
use crate::transport::build_router;

/// Run the hub until shutdown.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let auth = Authenticator::from_file(config.users_file.as_deref())?;
    let state = Arc::new(HubState::new(config, auth, shutdown.clone()));

    locks::spawn_sweeper(
        Arc::clone(&state.locks),
        state.config.lock_sweep_interval(),
        shutdown.clone(),
    );

    tracing::info!(leader = %state.leader_id, "tillsync hub listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
