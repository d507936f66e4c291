// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory append-only event store.
//!
//! The authoritative per-room log. Three indexes are kept in lockstep: a
//! primary map by `eventId`, a total-order map keyed `(lamport, deviceId,
//! eventId)` that serves replay and eviction, and a per-aggregate list sorted
//! by caller-assigned version. The store is rebuilt empty on restart, so
//! catch-up is bounded by the retained window.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::EventError;
use crate::event::{Event, EventFilter};

/// Total-order key: `(lamport, clock.deviceId, eventId)`.
type OrderKey = (u64, String, String);

#[derive(Default)]
struct StoreInner {
    events: HashMap<String, Arc<Event>>,
    ordered: BTreeMap<OrderKey, Arc<Event>>,
    aggregates: HashMap<String, Vec<Arc<Event>>>,
    last_lamport: u64,
}

/// Append-only, idempotent, Lamport-ordered event log with a count cap.
pub struct EventStore {
    inner: RwLock<StoreInner>,
    max_events: usize,
}

/// Read-only store counters for the stats endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_events: usize,
    pub last_lamport: u64,
    pub per_tenant: HashMap<String, usize>,
    pub per_type: HashMap<String, usize>,
}

impl EventStore {
    pub fn new(max_events: usize) -> Self {
        Self { inner: RwLock::new(StoreInner::default()), max_events }
    }

    // Guards are never held across an await; poisoned guards are recovered.
    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. `Ok(false)` means the `eventId` was already present
    /// and nothing changed; `Err` means validation rejected the event.
    pub fn append(&self, event: Event) -> Result<bool, EventError> {
        event.validate()?;

        let mut inner = self.write();
        if inner.events.contains_key(&event.event_id) {
            return Ok(false);
        }

        let lamport = event.clock.lamport;
        let order_key = event.order_key();
        let aggregate_key = event.aggregate_key();
        let event = Arc::new(event);

        inner.events.insert(event.event_id.clone(), Arc::clone(&event));
        inner.ordered.insert(order_key, Arc::clone(&event));

        let list = inner.aggregates.entry(aggregate_key).or_default();
        let at = list.partition_point(|e| e.version <= event.version);
        list.insert(at, Arc::clone(&event));

        inner.last_lamport = inner.last_lamport.max(lamport);

        while inner.events.len() > self.max_events {
            Self::evict_oldest(&mut inner);
        }

        Ok(true)
    }

    /// Remove the event with the smallest `(lamport, deviceId)` from every
    /// index, dropping emptied aggregate lists.
    fn evict_oldest(inner: &mut StoreInner) {
        let Some((key, _)) = inner.ordered.first_key_value() else {
            return;
        };
        let key = key.clone();
        let Some(event) = inner.ordered.remove(&key) else {
            return;
        };

        inner.events.remove(&event.event_id);

        let aggregate_key = event.aggregate_key();
        if let Some(list) = inner.aggregates.get_mut(&aggregate_key) {
            list.retain(|e| e.event_id != event.event_id);
            if list.is_empty() {
                inner.aggregates.remove(&aggregate_key);
            }
        }
    }

    pub fn get(&self, event_id: &str) -> Option<Arc<Event>> {
        self.read().events.get(event_id).cloned()
    }

    /// Events with `lamport > from_lamport` in canonical order, capped at
    /// `limit`. This is the catch-up path.
    pub fn get_bulk(&self, from_lamport: u64, limit: usize) -> Vec<Arc<Event>> {
        let Some(start) = from_lamport.checked_add(1) else {
            return Vec::new();
        };
        let inner = self.read();
        inner
            .ordered
            .range((Bound::Included((start, String::new(), String::new())), Bound::Unbounded))
            .take(limit)
            .map(|(_, event)| Arc::clone(event))
            .collect()
    }

    /// One room's events with `lamport > from_lamport` in canonical order.
    /// Catch-up replay path: rooms are isolation domains, so a client never
    /// receives another room's tail.
    pub fn room_events_after(
        &self,
        tenant_id: &str,
        store_id: &str,
        from_lamport: u64,
    ) -> Vec<Arc<Event>> {
        let Some(start) = from_lamport.checked_add(1) else {
            return Vec::new();
        };
        let inner = self.read();
        inner
            .ordered
            .range((Bound::Included((start, String::new(), String::new())), Bound::Unbounded))
            .filter(|(_, e)| e.tenant_id == tenant_id && e.store_id == store_id)
            .map(|(_, e)| Arc::clone(e))
            .collect()
    }

    /// An aggregate's events sorted by version ascending.
    pub fn get_aggregate(
        &self,
        tenant_id: &str,
        store_id: &str,
        aggregate_id: &str,
    ) -> Vec<Arc<Event>> {
        let key = crate::event::aggregate_key(tenant_id, store_id, aggregate_id);
        self.read().aggregates.get(&key).cloned().unwrap_or_default()
    }

    /// Filtered query in canonical total order. Uses the aggregate index when
    /// the filter pins `(tenant, store, aggregateId)`; otherwise walks the
    /// ordered index, bounded by the Lamport window when one is given.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<Arc<Event>> {
        let inner = self.read();

        if filter.has_aggregate_path() {
            let key = crate::event::aggregate_key(
                filter.tenant_id.as_deref().unwrap_or_default(),
                filter.store_id.as_deref().unwrap_or_default(),
                filter.aggregate_id.as_deref().unwrap_or_default(),
            );
            let mut hits: Vec<_> = inner
                .aggregates
                .get(&key)
                .map(|list| {
                    list.iter().filter(|e| filter.matches(e)).map(Arc::clone).collect()
                })
                .unwrap_or_default();
            hits.sort_by_key(|e| e.order_key());
            return hits;
        }

        let start = match filter.from_lamport.map(|from| from.checked_add(1)) {
            Some(None) => return Vec::new(),
            Some(Some(from)) => Bound::Included((from, String::new(), String::new())),
            None => Bound::Unbounded,
        };
        let end = match filter.to_lamport.map(|to| to.checked_add(1)) {
            Some(Some(to)) => Bound::Excluded((to, String::new(), String::new())),
            _ => Bound::Unbounded,
        };

        inner
            .ordered
            .range((start, end))
            .filter(|(_, e)| filter.matches(e))
            .map(|(_, e)| Arc::clone(e))
            .collect()
    }

    pub fn last_lamport(&self) -> u64 {
        self.read().last_lamport
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().events.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.read();
        let mut per_tenant: HashMap<String, usize> = HashMap::new();
        let mut per_type: HashMap<String, usize> = HashMap::new();
        for event in inner.events.values() {
            *per_tenant.entry(event.tenant_id.clone()).or_default() += 1;
            *per_type.entry(event.kind.clone()).or_default() += 1;
        }
        StoreStats {
            total_events: inner.events.len(),
            last_lamport: inner.last_lamport,
            per_tenant,
            per_type,
        }
    }

    /// Drop everything. Test hook.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.events.clear();
        inner.ordered.clear();
        inner.aggregates.clear();
        inner.last_lamport = 0;
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
