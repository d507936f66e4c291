// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain event wire type and validation.
//!
//! Events are the atomic sync unit: client-minted identity (`eventId`),
//! tenant/store room keys, a caller-assigned per-aggregate version, and a
//! Lamport stamp that drives all ordering. The payload is an opaque JSON bag
//! the hub never interprets.

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// The closed set of aggregates a POS deployment syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Order,
    User,
    Product,
    Kds,
    Bds,
    Inventory,
    Payment,
}

/// Who produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Lamport stamp, the ordering key. `device_id` breaks ties between
/// concurrent writers that minted the same Lamport value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockStamp {
    pub lamport: u64,
    pub device_id: String,
}

/// An append-only domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub version: u64,
    /// Dotted event taxonomy, e.g. `order.created`, `kds.ticket.done`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Wall-clock epoch millis. Informational only; ordering uses `clock`.
    pub at: u64,
    pub actor: Actor,
    pub clock: ClockStamp,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Room key: events and connections with the same `tenant:store` share a
    /// broadcast domain.
    pub fn room_key(&self) -> String {
        room_key(&self.tenant_id, &self.store_id)
    }

    /// Aggregate index key within the store.
    pub fn aggregate_key(&self) -> String {
        aggregate_key(&self.tenant_id, &self.store_id, &self.aggregate_id)
    }

    /// Canonical total-order key. The trailing `event_id` keeps the order
    /// strict even when one device reuses a Lamport value.
    pub fn order_key(&self) -> (u64, String, String) {
        (self.clock.lamport, self.clock.device_id.clone(), self.event_id.clone())
    }

    /// Validate the fields the store requires. Callers get the first failure.
    pub fn validate(&self) -> Result<(), EventError> {
        for (value, field) in [
            (&self.event_id, "eventId"),
            (&self.tenant_id, "tenantId"),
            (&self.store_id, "storeId"),
            (&self.aggregate_id, "aggregateId"),
            (&self.kind, "type"),
        ] {
            if value.is_empty() {
                return Err(EventError::MissingField(field));
            }
        }
        if self.at == 0 {
            return Err(EventError::BadTimestamp);
        }
        if self.version == 0 {
            return Err(EventError::BadVersion);
        }
        if self.actor.device_id.is_empty() {
            return Err(EventError::MissingField("actor.deviceId"));
        }
        if self.clock.device_id.is_empty() {
            return Err(EventError::MissingField("clock.deviceId"));
        }
        Ok(())
    }
}

pub fn room_key(tenant_id: &str, store_id: &str) -> String {
    format!("{tenant_id}:{store_id}")
}

pub fn aggregate_key(tenant_id: &str, store_id: &str, aggregate_id: &str) -> String {
    format!("{tenant_id}:{store_id}:{aggregate_id}")
}

/// Query filter for the event dump paths. All fields optional; `from_lamport`
/// is exclusive, `to_lamport` inclusive, time bounds are epoch millis on `at`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub tenant_id: Option<String>,
    pub store_id: Option<String>,
    pub aggregate_type: Option<AggregateType>,
    pub aggregate_id: Option<String>,
    pub from_lamport: Option<u64>,
    pub to_lamport: Option<u64>,
    pub from_time: Option<u64>,
    pub to_time: Option<u64>,
}

impl EventFilter {
    /// Whether the aggregate index can answer this filter directly.
    pub fn has_aggregate_path(&self) -> bool {
        self.tenant_id.is_some() && self.store_id.is_some() && self.aggregate_id.is_some()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref tenant) = self.tenant_id {
            if event.tenant_id != *tenant {
                return false;
            }
        }
        if let Some(ref store) = self.store_id {
            if event.store_id != *store {
                return false;
            }
        }
        if let Some(aggregate_type) = self.aggregate_type {
            if event.aggregate_type != aggregate_type {
                return false;
            }
        }
        if let Some(ref aggregate_id) = self.aggregate_id {
            if event.aggregate_id != *aggregate_id {
                return false;
            }
        }
        if let Some(from) = self.from_lamport {
            if event.clock.lamport <= from {
                return false;
            }
        }
        if let Some(to) = self.to_lamport {
            if event.clock.lamport > to {
                return false;
            }
        }
        if let Some(from) = self.from_time {
            if event.at < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if event.at > to {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
