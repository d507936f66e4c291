// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared hub state and the connection registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::clock::LamportClock;
use crate::config::HubConfig;
use crate::error::EventError;
use crate::event::Event;
use crate::locks::LockManager;
use crate::store::EventStore;
use crate::transport::ws_msg::ServerMessage;

/// Shared hub state.
pub struct HubState {
    pub config: HubConfig,
    /// This hub instance's identity, reported in `hello.ack`.
    pub leader_id: String,
    pub started_at: Instant,
    pub clock: LamportClock,
    pub store: EventStore,
    pub locks: Arc<LockManager>,
    pub auth: Authenticator,
    pub registry: Registry,
    pub shutdown: CancellationToken,
    /// Serializes append + room fan-out so every member's outbound queue sees
    /// relays in exactly the store's append order.
    publish: Mutex<()>,
}

impl HubState {
    pub fn new(config: HubConfig, auth: Authenticator, shutdown: CancellationToken) -> Self {
        let store = EventStore::new(config.max_events);
        let locks = Arc::new(LockManager::new(config.lock_ttl()));
        Self {
            config,
            leader_id: uuid::Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            clock: LamportClock::new(),
            store,
            locks,
            auth,
            registry: Registry::new(),
            shutdown,
            publish: Mutex::new(()),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Observe the event's Lamport, append, and on a fresh append relay the
    /// hub-sequenced copy to every room member. The sender is included: a
    /// client applies only events received back from the hub.
    pub fn append_and_relay(&self, event: Event) -> Result<bool, EventError> {
        let room = event.room_key();
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);

        self.clock.observe(event.clock.lamport);
        let fresh = self.store.append(event.clone())?;
        if fresh {
            for member in self.registry.room_members(&room) {
                member.send(ServerMessage::EventsRelay { event: event.clone() });
            }
        }
        Ok(fresh)
    }

    /// Fan a message out to a room, optionally excluding one connection.
    pub fn broadcast_room(&self, room: &str, message: &ServerMessage, exclude: Option<u64>) {
        for member in self.registry.room_members(room) {
            if Some(member.id) == exclude {
                continue;
            }
            member.send(message.clone());
        }
    }
}

/// A live WebSocket connection. Room membership starts once `hello` has been
/// accepted and a [`DeviceSession`] is attached.
pub struct ClientConn {
    pub id: u64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    session: RwLock<Option<DeviceSession>>,
    /// Greatest Lamport this client has acknowledged.
    pub cursor: AtomicU64,
    pub last_seen_ms: AtomicU64,
}

/// Registered device identity for one connection.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub device_id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl DeviceSession {
    pub fn room_key(&self) -> String {
        crate::event::room_key(&self.tenant_id, &self.store_id)
    }
}

impl ClientConn {
    /// Enqueue a message for the connection's writer task. Errors mean the
    /// connection is draining; drop silently.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    pub fn register_session(&self, session: DeviceSession, cursor: u64) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        self.cursor.store(cursor, Ordering::Release);
        self.touch();
    }

    pub fn device_session(&self) -> Option<DeviceSession> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn room(&self) -> Option<String> {
        self.device_session().map(|session| session.room_key())
    }

    /// Advance the cursor to at least `lamport`.
    pub fn advance_cursor(&self, lamport: u64) {
        self.cursor.fetch_max(lamport, Ordering::AcqRel);
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(epoch_ms(), Ordering::Relaxed);
    }
}

/// All live connections, keyed by connection id. Rooms are derived by
/// filtering on the registered session, so broadcast snapshots tolerate
/// concurrent joins and removals.
pub struct Registry {
    conns: RwLock<HashMap<u64, Arc<ClientConn>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self { conns: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    pub fn register(&self, outbound: mpsc::UnboundedSender<ServerMessage>) -> Arc<ClientConn> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(ClientConn {
            id,
            outbound,
            session: RwLock::new(None),
            cursor: AtomicU64::new(0),
            last_seen_ms: AtomicU64::new(epoch_ms()),
        });
        self.conns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&conn));
        conn
    }

    pub fn remove(&self, id: u64) -> Option<Arc<ClientConn>> {
        self.conns.write().unwrap_or_else(PoisonError::into_inner).remove(&id)
    }

    /// Snapshot of the registered members of one room.
    pub fn room_members(&self, room: &str) -> Vec<Arc<ClientConn>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|conn| conn.room().as_deref() == Some(room))
            .map(Arc::clone)
            .collect()
    }

    /// Snapshot of every live connection.
    pub fn snapshot(&self) -> Vec<Arc<ClientConn>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.conns.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
