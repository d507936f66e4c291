// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login sessions for cashier-facing devices.
//!
//! The user directory is deployment config: a JSON file of accounts loaded at
//! startup. Login mints an opaque UUID session token; `hello` resolves it to
//! attach user identity to a connection. Displays and other read-only peers
//! connect without a session. Password hashing is out of scope here; the
//! directory file is trusted deployment config on the LAN.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::state::epoch_ms;

/// One entry in the user directory file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub email: String,
    pub password: String,
    pub tenant_id: String,
    pub user_id: String,
    pub user_name: String,
}

/// A resolved login session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub email: String,
    pub tenant_id: String,
    pub created_at: u64,
}

/// Maps `(email, password, tenant)` to a session and session ids back to
/// users.
pub struct Authenticator {
    users: Vec<UserAccount>,
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl Authenticator {
    pub fn new(users: Vec<UserAccount>) -> Self {
        Self { users, sessions: RwLock::new(HashMap::new()) }
    }

    /// Load the directory from a JSON file. `None` yields an empty directory:
    /// logins fail, unauthenticated connections still work.
    pub fn from_file(path: Option<&Path>) -> anyhow::Result<Self> {
        let users = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str(&contents)?
            }
            None => Vec::new(),
        };
        Ok(Self::new(users))
    }

    pub fn login(&self, email: &str, password: &str, tenant_id: &str) -> Option<AuthSession> {
        let account = self
            .users
            .iter()
            .find(|account| account.tenant_id == tenant_id && account.email == email)?;
        if !constant_time_eq(password, &account.password) {
            return None;
        }

        let session = AuthSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: account.user_id.clone(),
            user_name: account.user_name.clone(),
            email: account.email.clone(),
            tenant_id: account.tenant_id.clone(),
            created_at: epoch_ms(),
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id.clone(), session.clone());
        Some(session)
    }

    pub fn resolve(&self, session_id: &str) -> Option<AuthSession> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
