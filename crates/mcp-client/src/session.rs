//! Server sessions: one live tool-server process, its handshake, and the
//! capabilities it advertised.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use tp_domain::config::ProcessSpec;

use crate::error::McpError;
use crate::protocol::{
    self, InitializeResult, McpToolDef, ServerInfo, ToolCallResult, ToolsListResult,
};
use crate::schema;
use crate::transport::{ExitOutcome, McpTransport, StdioTransport, TransportError};

/// Upper bound on `tools/list` pages followed during the handshake.
const MAX_TOOL_PAGES: usize = 32;

/// JSON-RPC "method not found": the server exposes no tools.
const METHOD_NOT_FOUND: i64 = -32601;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of a [`ServerSession`]. `Failed` and `Stopped` are terminal
/// for requests; only `shutdown` acts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unstarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a session, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub server: String,
    pub command: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServerSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The live binding to one tool server.
///
/// `launch` and `handshake` take `&mut self` and run once; `invoke`,
/// `state` and `shutdown` take `&self` so a ready session can be shared
/// between concurrent callers.
pub struct ServerSession {
    spec: Arc<ProcessSpec>,
    label: String,
    state: Mutex<SessionState>,
    transport: Option<Box<dyn McpTransport>>,
    /// Tools discovered via `tools/list`; empty until the handshake succeeds.
    tools: Vec<McpToolDef>,
    server_info: Option<ServerInfo>,
    request_timeout: Duration,
    started_at: Option<DateTime<Utc>>,
}

impl ServerSession {
    pub fn new(spec: Arc<ProcessSpec>) -> Self {
        let label = spec.label();
        Self {
            spec,
            label,
            state: Mutex::new(SessionState::Unstarted),
            transport: None,
            tools: Vec::new(),
            server_info: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            started_at: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&McpToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.as_ref().and_then(|t| t.pid())
    }

    /// Current state. A ready session whose process has gone away is
    /// reported (and recorded) as `Stopped`.
    pub fn state(&self) -> SessionState {
        let mut state = self.state.lock();
        if *state == SessionState::Ready && !self.transport.as_ref().is_some_and(|t| t.is_alive()) {
            tracing::warn!(server = %self.label, "tool server exited unexpectedly");
            *state = SessionState::Stopped;
        }
        *state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            server: self.label.clone(),
            command: self.spec.command.clone(),
            state: self.state(),
            pid: self.pid(),
            tool_count: self.tools.len(),
            server_info: self.server_info.clone(),
            started_at: self.started_at,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the server process and wire its stdio as the transport.
    pub fn launch(&mut self) -> Result<(), McpError> {
        self.expect_state(SessionState::Unstarted, "launch")?;
        *self.state.lock() = SessionState::Starting;

        match StdioTransport::spawn(&self.spec) {
            Ok(transport) => {
                self.attach(Box::new(transport));
                Ok(())
            }
            Err(source) => {
                *self.state.lock() = SessionState::Failed;
                Err(McpError::Spawn {
                    server: self.label.clone(),
                    command: self.spec.command.clone(),
                    source,
                })
            }
        }
    }

    /// Launch over an already-connected transport instead of spawning.
    pub fn launch_with(&mut self, transport: Box<dyn McpTransport>) -> Result<(), McpError> {
        self.expect_state(SessionState::Unstarted, "launch")?;
        self.attach(transport);
        Ok(())
    }

    fn attach(&mut self, transport: Box<dyn McpTransport>) {
        let pid = transport.pid();
        self.transport = Some(transport);
        self.started_at = Some(Utc::now());
        *self.state.lock() = SessionState::Starting;
        tracing::info!(server = %self.label, pid, "tool server launched");
    }

    /// Run `initialize` / `notifications/initialized` / `tools/list`.
    ///
    /// The whole exchange is bounded by `timeout`. Any failure, including
    /// the returned future being dropped early, leaves the session `Failed`.
    pub async fn handshake(&mut self, timeout: Duration) -> Result<(), McpError> {
        self.expect_state(SessionState::Starting, "handshake")?;
        let Some(transport) = self.transport.as_deref() else {
            return Err(self.transition_error("handshake"));
        };

        let mut guard = FailOnDrop {
            state: &self.state,
            armed: true,
        };

        let exchanged = tokio::time::timeout(timeout, exchange(transport, &self.label, timeout));
        let outcome = match exchanged.await {
            Ok(result) => result,
            Err(_) => Err(McpError::HandshakeTimeout {
                server: self.label.clone(),
                timeout,
            }),
        };

        let (init, tools) = match outcome {
            Ok(found) => found,
            Err(err) => {
                let err = with_stderr_context(err, transport);
                tracing::warn!(server = %self.label, error = %err, "tool server handshake failed");
                return Err(err);
            }
        };

        guard.armed = false;
        tracing::info!(
            server = %self.label,
            server_name = %init.server_info.name,
            protocol_version = %init.protocol_version,
            tool_count = tools.len(),
            "tool server ready"
        );
        self.server_info = Some(init.server_info);
        self.tools = tools;
        *self.state.lock() = SessionState::Ready;
        Ok(())
    }

    /// Call a tool on this server.
    ///
    /// Arguments are checked against the tool's advertised input schema
    /// before anything is sent. A `null` argument value means "no arguments".
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(McpError::SessionDead {
                server: self.label.clone(),
                state,
            });
        }

        let tool = self.tool(tool_name).ok_or_else(|| McpError::UnknownTool {
            tool: tool_name.to_string(),
        })?;

        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        schema::validate_arguments(&tool.input_schema, &arguments).map_err(|reason| {
            McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason,
            }
        })?;

        let Some(transport) = self.transport.as_deref() else {
            return Err(self.transition_error("invoke"));
        };

        let params = protocol::tool_call_params(tool_name, arguments);
        let resp = match transport
            .send_request("tools/call", Some(params), self.request_timeout)
            .await
        {
            Ok(resp) => resp,
            Err(TransportError::ProcessExited) => {
                return Err(McpError::SessionDead {
                    server: self.label.clone(),
                    state: self.state(),
                });
            }
            Err(TransportError::Timeout(timeout)) => {
                return Err(McpError::InvokeTimeout {
                    tool: tool_name.to_string(),
                    server: self.label.clone(),
                    timeout,
                });
            }
            Err(source) => {
                return Err(McpError::Transport {
                    server: self.label.clone(),
                    source,
                });
            }
        };

        let value = resp.into_result().map_err(|err| McpError::ToolExecution {
            tool: tool_name.to_string(),
            server: self.label.clone(),
            message: err.message,
        })?;

        let result: ToolCallResult = serde_json::from_value(value).map_err(|e| McpError::Protocol {
            server: self.label.clone(),
            message: format!("malformed tools/call result: {e}"),
        })?;

        if result.is_error {
            let text = result.text();
            return Err(McpError::ToolExecution {
                tool: tool_name.to_string(),
                server: self.label.clone(),
                message: if text.is_empty() {
                    "tool reported an error".into()
                } else {
                    text
                },
            });
        }

        Ok(result)
    }

    /// Stop the server: close its stdin, wait up to `grace`, then kill it.
    ///
    /// Safe to call in any state and more than once; the session always
    /// ends up `Stopped`.
    pub async fn shutdown(&self, grace: Duration) -> Result<ExitOutcome, McpError> {
        let result = match self.transport.as_deref() {
            Some(transport) => transport.shutdown(grace).await,
            None => Ok(ExitOutcome::AlreadyStopped),
        };

        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Stopped);

        match result {
            Ok(outcome) => {
                if outcome != ExitOutcome::AlreadyStopped {
                    tracing::info!(
            server = %self.label,
            ?outcome,
            %previous,
            "tool server stopped"
        );
                }
                Ok(outcome)
            }
            Err(source) => Err(McpError::Transport {
                server: self.label.clone(),
                source,
            }),
        }
    }

    fn expect_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), McpError> {
        if *self.state.lock() == expected {
            Ok(())
        } else {
            Err(self.transition_error(operation))
        }
    }

    fn transition_error(&self, operation: &'static str) -> McpError {
        McpError::InvalidTransition {
            server: self.label.clone(),
            operation,
            state: *self.state.lock(),
        }
    }
}

/// Marks the session `Failed` unless disarmed.
struct FailOnDrop<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl Drop for FailOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = SessionState::Failed;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn exchange(
    transport: &dyn McpTransport,
    server: &str,
    timeout: Duration,
) -> Result<(InitializeResult, Vec<McpToolDef>), McpError> {
    // Step 1: `initialize`.
    let params = serde_json::to_value(protocol::initialize_params())
        .map_err(|e| {
            protocol_error(server, format!("failed to serialize initialize params: {e}"))
        })?;
    let resp = transport
        .send_request("initialize", Some(params), timeout)
        .await
        .map_err(|e| handshake_transport_error(server, e))?;
    let value = resp
        .into_result()
        .map_err(|e| protocol_error(server, format!("initialize failed: {e}")))?;
    let init: InitializeResult = serde_json::from_value(value)
        .map_err(|e| protocol_error(server, format!("malformed initialize result: {e}")))?;

    // Step 2: `notifications/initialized`.
    transport
        .send_notification("notifications/initialized")
        .await
        .map_err(|e| handshake_transport_error(server, e))?;

    // Step 3: `tools/list`, following pagination.
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.take().map(|c| json!({ "cursor": c }));
        let resp = transport
            .send_request("tools/list", params, timeout)
            .await
            .map_err(|e| handshake_transport_error(server, e))?;

        let value = match resp.into_result() {
            Ok(value) => value,
            Err(err) if err.code == METHOD_NOT_FOUND && tools.is_empty() => {
                tracing::warn!(
                    server,
                    "tool server does not implement tools/list, no tools available"
                );
                return Ok((init, Vec::new()));
            }
            Err(err) => return Err(protocol_error(server, format!("tools/list failed: {err}"))),
        };

        let page: ToolsListResult = serde_json::from_value(value)
            .map_err(|e| protocol_error(server, format!("malformed tools/list result: {e}")))?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok((init, check_tools(server, tools)?)),
        }
    }

    Err(protocol_error(
        server,
        format!("tools/list did not finish within {MAX_TOOL_PAGES} pages"),
    ))
}

/// Reject unusable definitions; keep the first of any duplicated name.
fn check_tools(server: &str, tools: Vec<McpToolDef>) -> Result<Vec<McpToolDef>, McpError> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(tools.len());
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err(protocol_error(server, "advertised a tool with an empty name".into()));
        }
        if !tool.input_schema.is_object() {
            return Err(protocol_error(
                server,
                format!("tool {} has a non-object inputSchema", tool.name),
            ));
        }
        if !seen.insert(tool.name.clone()) {
            tracing::warn!(
                server,
                tool = %tool.name,
                "duplicate tool name from one server, keeping the first"
            );
            continue;
        }
        kept.push(tool);
    }
    Ok(kept)
}

fn protocol_error(server: &str, message: String) -> McpError {
    McpError::Protocol {
        server: server.to_string(),
        message,
    }
}

fn handshake_transport_error(server: &str, err: TransportError) -> McpError {
    match err {
        TransportError::ProcessExited => {
            protocol_error(server, "server exited before completing the handshake".into())
        }
        // Individual requests share the overall handshake bound.
        TransportError::Timeout(timeout) => McpError::HandshakeTimeout {
            server: server.to_string(),
            timeout,
        },
        source => McpError::Transport {
            server: server.to_string(),
            source,
        },
    }
}

/// Append whatever the server last wrote to stderr to a protocol error.
fn with_stderr_context(err: McpError, transport: &dyn McpTransport) -> McpError {
    let tail = transport.stderr_tail();
    match err {
        McpError::Protocol { server, message } if !tail.is_empty() => McpError::Protocol {
            server,
            message: format!("{message} | stderr: {}", tail.join(" / ")),
        },
        other => other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
