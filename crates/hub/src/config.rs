// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the tillsync hub.
#[derive(Debug, Clone, clap::Args)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 4001, env = "PORT")]
    pub port: u16,

    /// Maximum retained events; the oldest by Lamport are evicted past this.
    #[arg(long, default_value_t = 10_000, env = "TILLSYNC_MAX_EVENTS")]
    pub max_events: usize,

    /// Lock time-to-live in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "TILLSYNC_LOCK_TTL_MS")]
    pub lock_ttl_ms: u64,

    /// Lock sweep interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "TILLSYNC_LOCK_SWEEP_MS")]
    pub lock_sweep_ms: u64,

    /// Catch-up replay batch size per `events.bulk` frame.
    #[arg(long, default_value_t = 500, env = "TILLSYNC_REPLAY_BATCH")]
    pub replay_batch: usize,

    /// Path to the user directory JSON file. If unset, logins are disabled.
    #[arg(long, env = "TILLSYNC_USERS_FILE")]
    pub users_file: Option<std::path::PathBuf>,
}

impl HubConfig {
    pub fn lock_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_sweep_ms)
    }
}
