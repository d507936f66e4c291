// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pessimistic per-aggregate locks.
//!
//! A lock scopes edit rights on one aggregate (typically an order) to a
//! single device within a `(tenant, store)` room. TTL is a sliding window:
//! renewal and owner re-acquire both extend `expiresAt` from now. A periodic
//! sweep garbage-collects expired records; on-demand accessors also lazily
//! evict stale entries they encounter. The sweep does not broadcast
//! releases: the session layer announces only explicit releases and
//! disconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::state::epoch_ms;

/// Lock scope. The same `aggregate_id` under different rooms is a different
/// lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub tenant_id: String,
    pub store_id: String,
    pub aggregate_id: String,
}

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub aggregate_id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Epoch millis.
    pub acquired_at: u64,
    /// Epoch millis.
    pub expires_at: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at < now
    }

    pub fn room_key(&self) -> String {
        crate::event::room_key(&self.tenant_id, &self.store_id)
    }
}

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// Fresh grant, or owner re-acquire (which renews the TTL).
    Granted(LockRecord),
    /// An unexpired lock is held by another device.
    Held(LockRecord),
}

/// Lock counters for the stats endpoints. Expired-but-unswept records are not
/// counted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    pub total_locks: usize,
    pub per_tenant: HashMap<String, usize>,
    pub per_store: HashMap<String, usize>,
}

/// Per-aggregate mutual exclusion with bounded holder time.
pub struct LockManager {
    locks: Mutex<HashMap<LockKey, LockRecord>>,
    ttl_ms: u64,
    cancel: CancellationToken,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            ttl_ms: ttl.as_millis() as u64,
            cancel: CancellationToken::new(),
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<LockKey, LockRecord>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire or renew (owner re-acquire) the lock on an aggregate.
    pub fn acquire(
        &self,
        tenant_id: &str,
        store_id: &str,
        aggregate_id: &str,
        device_id: &str,
        user_id: Option<String>,
        user_name: Option<String>,
    ) -> AcquireResult {
        let now = epoch_ms();
        let key = LockKey {
            tenant_id: tenant_id.to_owned(),
            store_id: store_id.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
        };

        let mut locks = self.guard();
        if let Some(existing) = locks.get_mut(&key) {
            if !existing.is_expired(now) {
                if existing.device_id == device_id {
                    existing.expires_at = now + self.ttl_ms;
                    return AcquireResult::Granted(existing.clone());
                }
                return AcquireResult::Held(existing.clone());
            }
        }

        let record = LockRecord {
            aggregate_id: aggregate_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            store_id: store_id.to_owned(),
            device_id: device_id.to_owned(),
            user_id,
            user_name,
            acquired_at: now,
            expires_at: now + self.ttl_ms,
        };
        locks.insert(key, record.clone());
        AcquireResult::Granted(record)
    }

    /// Extend the TTL from now. Owner-only; anyone else (or an absent or
    /// expired lock) gets `None`.
    pub fn renew(
        &self,
        tenant_id: &str,
        store_id: &str,
        aggregate_id: &str,
        device_id: &str,
    ) -> Option<LockRecord> {
        let now = epoch_ms();
        let key = LockKey {
            tenant_id: tenant_id.to_owned(),
            store_id: store_id.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
        };

        let mut locks = self.guard();
        let expired = locks.get(&key).map(|record| record.is_expired(now))?;
        if expired {
            locks.remove(&key);
            return None;
        }
        let record = locks.get_mut(&key)?;
        if record.device_id != device_id {
            return None;
        }
        record.expires_at = now + self.ttl_ms;
        Some(record.clone())
    }

    /// Owner-only release. Non-owner and absent-lock calls are silent no-ops.
    pub fn release(
        &self,
        tenant_id: &str,
        store_id: &str,
        aggregate_id: &str,
        device_id: &str,
    ) -> bool {
        let now = epoch_ms();
        let key = LockKey {
            tenant_id: tenant_id.to_owned(),
            store_id: store_id.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
        };

        let mut locks = self.guard();
        let Some(record) = locks.get(&key) else {
            return false;
        };
        if record.is_expired(now) {
            locks.remove(&key);
            return false;
        }
        if record.device_id != device_id {
            return false;
        }
        locks.remove(&key);
        true
    }

    /// Atomically drop every lock owned by a device, returning the removed
    /// records so the session layer can broadcast the releases.
    pub fn release_device_locks(&self, device_id: &str) -> Vec<LockRecord> {
        let mut locks = self.guard();
        let keys: Vec<LockKey> = locks
            .iter()
            .filter(|(_, record)| record.device_id == device_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| locks.remove(key)).collect()
    }

    /// Current holder, if the lock exists and is unexpired. Encountered stale
    /// records are garbage-collected.
    pub fn get_lock_status(
        &self,
        tenant_id: &str,
        store_id: &str,
        aggregate_id: &str,
    ) -> Option<LockRecord> {
        let now = epoch_ms();
        let key = LockKey {
            tenant_id: tenant_id.to_owned(),
            store_id: store_id.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
        };

        let mut locks = self.guard();
        let record = locks.get(&key)?;
        if record.is_expired(now) {
            locks.remove(&key);
            return None;
        }
        Some(record.clone())
    }

    /// Unexpired locks in one room. Stale entries encountered on the way are
    /// garbage-collected.
    pub fn get_active_locks(&self, tenant_id: &str, store_id: &str) -> Vec<LockRecord> {
        let now = epoch_ms();
        let mut locks = self.guard();

        let stale: Vec<LockKey> = locks
            .iter()
            .filter(|(key, record)| {
                key.tenant_id == tenant_id && key.store_id == store_id && record.is_expired(now)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            locks.remove(key);
        }

        let mut active: Vec<LockRecord> = locks
            .values()
            .filter(|record| record.tenant_id == tenant_id && record.store_id == store_id)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.aggregate_id.cmp(&b.aggregate_id));
        active
    }

    pub fn stats(&self) -> LockStats {
        let now = epoch_ms();
        let locks = self.guard();
        let mut per_tenant: HashMap<String, usize> = HashMap::new();
        let mut per_store: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;
        for record in locks.values() {
            if record.is_expired(now) {
                continue;
            }
            total += 1;
            *per_tenant.entry(record.tenant_id.clone()).or_default() += 1;
            *per_store.entry(record.room_key()).or_default() += 1;
        }
        LockStats { total_locks: total, per_tenant, per_store }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = epoch_ms();
        let mut locks = self.guard();
        let before = locks.len();
        locks.retain(|_, record| !record.is_expired(now));
        before - locks.len()
    }

    /// Stop the sweeper task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Spawn the periodic sweep task. Stops when [`LockManager::shutdown`] is
/// called or the parent token is cancelled.
pub fn spawn_sweeper(manager: Arc<LockManager>, interval: Duration, parent: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = manager.cancel.cancelled() => break,
                _ = parent.cancelled() => break,
                _ = timer.tick() => {}
            }

            let removed = manager.sweep();
            if removed > 0 {
                tracing::debug!(removed, "swept expired locks");
            }
        }
    });
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
