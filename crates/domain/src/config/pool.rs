use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::server::ProcessSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session pool configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a pool brings its sessions up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    /// One server at a time, in spec order.
    #[default]
    Sequential,
    /// Spawn in order, then handshake all servers concurrently.
    Concurrent,
}

/// The `[pool]` section: which tool servers to run and how long to wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Tool servers, in precedence order.
    #[serde(default)]
    pub servers: Vec<ProcessSpec>,

    /// Upper bound for the whole `initialize` + `tools/list` exchange.
    #[serde(default = "d_30000")]
    pub handshake_timeout_ms: u64,

    /// Upper bound for a single tool call.
    #[serde(default = "d_60000")]
    pub request_timeout_ms: u64,

    /// How long a server may take to exit after its stdin is closed
    /// before it is killed.
    #[serde(default = "d_5000")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub startup: StartupMode,

    /// Environment shared by every server, resolved once at startup.
    /// Filled in by the loader from `[env]`; never read from the file.
    #[serde(skip)]
    pub shared_env: BTreeMap<String, String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            handshake_timeout_ms: d_30000(),
            request_timeout_ms: d_60000(),
            shutdown_grace_ms: d_5000(),
            startup: StartupMode::default(),
            shared_env: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn new(servers: Vec<ProcessSpec>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// The server specs with the shared environment applied underneath.
    pub fn resolved_servers(&self) -> Vec<ProcessSpec> {
        self.servers
            .iter()
            .map(|spec| spec.with_shared_env(&self.shared_env))
            .collect()
    }
}

fn d_30000() -> u64 {
    30_000
}

fn d_60000() -> u64 {
    60_000
}

fn d_5000() -> u64 {
    5_000
}
