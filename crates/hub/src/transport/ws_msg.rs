// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket message types for the sync protocol.
//!
//! Messages are internally-tagged JSON (`{"type": "events.append", ...}`)
//! with dotted message names as the routing key. Two top-level enums cover
//! the client-to-hub and hub-to-client directions.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::locks::LockRecord;

/// Messages a device sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register this connection into its tenant/store room and request
    /// catch-up from `cursor`.
    #[serde(rename = "hello")]
    Hello {
        #[serde(default)]
        device_id: String,
        #[serde(default)]
        tenant_id: String,
        #[serde(default)]
        store_id: String,
        #[serde(default)]
        cursor: Option<u64>,
        #[serde(default)]
        auth: Option<HelloAuth>,
    },
    #[serde(rename = "events.append")]
    EventsAppend { event: Event },
    /// Explicit catch-up, ignoring the stored cursor.
    #[serde(rename = "cursor.request")]
    CursorRequest { from_lamport: u64 },
    #[serde(rename = "order.lock.request")]
    LockRequest {
        order_id: String,
        tenant_id: String,
        store_id: String,
    },
    #[serde(rename = "order.lock.renew")]
    LockRenew {
        order_id: String,
        tenant_id: String,
        store_id: String,
    },
    #[serde(rename = "order.lock.release")]
    LockRelease {
        order_id: String,
        tenant_id: String,
        store_id: String,
    },
    #[serde(rename = "order.lock.status")]
    LockStatus {
        order_id: String,
        tenant_id: String,
        store_id: String,
    },
    #[serde(rename = "ping")]
    Ping {},
}

/// Optional login-session reference in `hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    pub session_id: String,
}

/// Messages the hub sends to devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "hello.ack")]
    HelloAck {
        leader_id: String,
        /// Epoch millis on the hub.
        server_time: u64,
        snapshot_needed: bool,
    },
    /// The authoritative, hub-sequenced copy of an appended event.
    #[serde(rename = "events.relay")]
    EventsRelay { event: Event },
    /// A catch-up batch in canonical `(lamport, deviceId)` order.
    #[serde(rename = "events.bulk")]
    EventsBulk {
        events: Vec<Event>,
        from_lamport: u64,
        to_lamport: u64,
    },
    #[serde(rename = "order.lock.response")]
    LockResponse {
        order_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        lock: Option<LockRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "order.lock.renewed")]
    LockRenewed {
        order_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<u64>,
    },
    /// Direct reply to a release (carries `success`) and the room broadcast
    /// for explicit releases and disconnect sweeps (which omits it).
    #[serde(rename = "order.lock.released")]
    LockReleased {
        order_id: String,
        device_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        reason: String,
    },
    #[serde(rename = "order.lock.status.response")]
    LockStatusResponse {
        order_id: String,
        is_locked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        lock: Option<LockRecord>,
    },
    /// Room notification (excluding the acquirer) that an order is now held.
    #[serde(rename = "order.locked")]
    OrderLocked {
        order_id: String,
        device_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        acquired_at: u64,
    },
    #[serde(rename = "pong")]
    Pong {},
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
