//! `tp-mcp-client`: runs MCP tool servers as child processes and exposes
//! their tools as one catalogue.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for the MCP stdio wire format.
//! - A stdio transport that spawns a child process and multiplexes requests
//!   over its stdin/stdout.
//! - [`ServerSession`], the lifecycle of one server (launch, handshake,
//!   invoke, shutdown).
//! - [`SessionPool`], which starts a list of servers all-or-nothing and tears
//!   them down together, and [`ToolRegistry`], the merged view handed to an
//!   agent runner.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tp_domain::config::{PoolConfig, ProcessSpec};
//! use tp_mcp_client::SessionPool;
//!
//! let config = PoolConfig::new(vec![
//!     ProcessSpec::new("uv").with_args(["run", "accounts_server.py"]),
//! ]);
//! let pool = SessionPool::start(&config).await?;
//!
//! for (name, _schema) in pool.registry()?.list_tools() {
//!     println!("{name}");
//! }
//! let result = pool.invoke("get_balance", json!({"name": "Warren"})).await?;
//!
//! pool.shutdown().await;
//! ```

pub mod error;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::McpError;
pub use pool::{run_scoped, PoolState, SessionPool, ShutdownReport};
pub use protocol::{McpToolDef, ToolCallResult};
pub use registry::{ToolEntry, ToolRegistry};
pub use session::{ServerSession, SessionState, SessionStatus};
pub use transport::{ExitOutcome, McpTransport, StdioTransport, TransportError};
