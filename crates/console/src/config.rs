// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI flags and the on-disk server list. Parsing the server-list file's
//! contents is in scope (sessions are built from it); anything beyond that
//! — a config-file *format* — is explicitly out of scope per spec.md §1.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Time-window ladder for `+`/`-` zoom (spec.md §4.8), in seconds.
pub const WINDOW_LADDER_SECS: &[i64] = &[300, 900, 1800, 3600, 6_000, 21_600, 86_400];

/// Snap an arbitrary requested window to the closest ladder rung, so
/// `--default-window-secs` always lands a new session on a real zoom step.
pub fn nearest_ladder_secs(secs: i64) -> i64 {
    WINDOW_LADDER_SECS
        .iter()
        .min_by_key(|&&rung| (rung - secs).abs())
        .copied()
        .unwrap_or(WINDOW_LADDER_SECS[0])
}

/// CLI configuration.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "console", about = "Multi-server observability console")]
pub struct Config {
    /// Path to the server list (JSON array of `ServerConfig`).
    #[arg(long, default_value = "servers.json", env = "CONSOLE_CONFIG")]
    pub config: PathBuf,

    /// Deadline for fast request/response calls, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "CONSOLE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Deadline for historical backfill queries, in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "CONSOLE_BACKFILL_TIMEOUT_MS")]
    pub backfill_timeout_ms: u64,

    /// Default (live) metrics window, in seconds — ~100 minutes at the
    /// default 10s sample interval (spec.md §3).
    #[arg(long, default_value_t = 6_000, env = "CONSOLE_DEFAULT_WINDOW_SECS")]
    pub default_window_secs: i64,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backfill_timeout(&self) -> Duration {
        Duration::from_millis(self.backfill_timeout_ms)
    }

    /// Load and validate the server list: session keys (`name`) must be
    /// unique, mirroring the teacher's eager-validation approach.
    pub fn load_servers(&self) -> anyhow::Result<Vec<ServerConfig>> {
        let contents = std::fs::read_to_string(&self.config)
            .with_context(|| format!("reading server list {}", self.config.display()))?;
        let servers: Vec<ServerConfig> =
            serde_json::from_str(&contents).context("parsing server list")?;

        let mut seen = HashSet::with_capacity(servers.len());
        for server in &servers {
            if !seen.insert(server.name.as_str()) {
                bail!("duplicate server name {:?} in {}", server.name, self.config.display());
            }
        }
        Ok(servers)
    }
}

/// One configured server (spec.md §3 "Session ... keyed by server name").
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Short human label; never a host address (spec.md §3).
    pub name: String,
    /// SSH host to tunnel through. `None` means the agent socket is dialed
    /// directly, no tunnel involved.
    #[serde(default)]
    pub host: Option<String>,
    /// Path to the agent's Unix socket — remote-side path when tunneled,
    /// local path otherwise.
    pub socket_path: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<String>,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
