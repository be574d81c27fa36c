//! Persistent configuration for parley.
//!
//! Config file lives at `~/.config/parley/cli.toml`. The saved session is
//! kept next to it in `session.toml` (see `parley_sdk::store`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use parley_sdk::backoff::{DEFAULT_BASE, DEFAULT_CAP, ReconnectPolicy};
use parley_sdk::client::{ConnectConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HISTORY_TIMEOUT};
use parley_sdk::endpoint::{DEFAULT_SERVER, Endpoint};
use serde::{Deserialize, Serialize};

/// User configuration (persisted in cli.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server URL. Default: http://127.0.0.1:8000
    pub server: Option<String>,
    /// Reconnect delay unit in milliseconds (attempt n waits n units).
    pub reconnect_base_ms: Option<u64>,
    /// Upper bound on the reconnect delay in milliseconds.
    pub reconnect_cap_ms: Option<u64>,
    /// Live-stream handshake timeout in seconds.
    pub handshake_timeout_secs: Option<u64>,
    /// History fetch timeout in seconds.
    pub history_timeout_secs: Option<u64>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
}

fn config_path() -> PathBuf {
    config_dir().join("cli.toml")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => tracing::warn!("bad config file {}: {e}", path.display()),
                },
                Err(e) => tracing::warn!("can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub endpoint: Endpoint,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub history_timeout: Duration,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Result<Self> {
        let server = cli
            .server
            .clone()
            .or_else(|| config.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let endpoint = Endpoint::parse(&server).with_context(|| format!("server {server:?}"))?;

        let base = cli
            .reconnect_base_ms
            .or(config.reconnect_base_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE);
        let cap = cli
            .reconnect_cap_ms
            .or(config.reconnect_cap_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CAP);

        let handshake_timeout = cli
            .handshake_timeout_secs
            .or(config.handshake_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        let history_timeout = cli
            .history_timeout_secs
            .or(config.history_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HISTORY_TIMEOUT);

        Ok(Self {
            endpoint,
            reconnect: ReconnectPolicy::new(base, cap),
            handshake_timeout,
            history_timeout,
        })
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            endpoint: self.endpoint.clone(),
            reconnect: self.reconnect,
            handshake_timeout: self.handshake_timeout,
            history_timeout: self.history_timeout,
            pull_history: true,
        }
    }
}
