use std::time::Duration;

use tp_domain::config::SpecError;

use crate::pool::PoolState;
use crate::session::SessionState;
use crate::transport::TransportError;

/// Errors specific to tool-server sessions and pools.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("invalid spec for tool server {server}: {source}")]
    InvalidSpec {
        server: String,
        #[source]
        source: SpecError,
    },

    #[error("failed to spawn tool server {server} ({command}): {source}")]
    Spawn {
        server: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server {server} did not complete the handshake within {timeout:?}")]
    HandshakeTimeout { server: String, timeout: Duration },

    #[error("protocol error from tool server {server}: {message}")]
    Protocol { server: String, message: String },

    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The server reported a failure. `message` is the server's own text.
    #[error("tool {tool} failed: {message}")]
    ToolExecution {
        tool: String,
        server: String,
        message: String,
    },

    #[error("tool {tool} on {server} timed out after {timeout:?}")]
    InvokeTimeout {
        tool: String,
        server: String,
        timeout: Duration,
    },

    #[error("tool server {server} is not running (state: {state})")]
    SessionDead { server: String, state: SessionState },

    #[error("cannot {operation} tool server {server} in state {state}")]
    InvalidTransition {
        server: String,
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to start tool server #{index} ({server}): {source}")]
    PoolStartup {
        index: usize,
        server: String,
        #[source]
        source: Box<McpError>,
    },

    #[error("session pool is not ready (state: {state})")]
    PoolNotReady { state: PoolState },

    #[error("transport error on tool server {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: TransportError,
    },
}

impl McpError {
    /// The underlying cause for pool startup failures, `self` otherwise.
    pub fn root(&self) -> &McpError {
        match self {
            McpError::PoolStartup { source, .. } => source.root(),
            other => other,
        }
    }
}
