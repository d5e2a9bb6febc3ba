//! Session pool: the set of tool servers one agent run uses, started and
//! stopped as a unit.
//!
//! Startup is all-or-nothing: [`SessionPool::start`] either returns a pool
//! in which every session is ready, or tears down whatever it launched and
//! fails with [`McpError::PoolStartup`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use tp_domain::config::{PoolConfig, StartupMode};

use crate::error::McpError;
use crate::protocol::ToolCallResult;
use crate::registry::{ToolIndex, ToolRegistry};
use crate::session::{ServerSession, SessionStatus};
use crate::transport::ExitOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Ready,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Ready => f.write_str("ready"),
            PoolState::Stopped => f.write_str("stopped"),
        }
    }
}

/// What happened to one server during [`SessionPool::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionShutdown {
    pub server: String,
    #[serde(flatten)]
    pub outcome: ExitOutcome,
}

/// Result of a pool shutdown. Individual failures are collected here rather
/// than returned, so teardown always runs to the end.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub sessions: Vec<SessionShutdown>,
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SessionPool {
    run_id: Uuid,
    sessions: Vec<ServerSession>,
    /// Merged once at startup; sessions' tool lists never change after.
    index: ToolIndex,
    state: Mutex<PoolState>,
    shutdown_grace: Duration,
}

impl SessionPool {
    /// Launch and handshake every configured server.
    pub async fn start(config: &PoolConfig) -> Result<Self, McpError> {
        let run_id = Uuid::new_v4();
        let specs = config.resolved_servers();
        tracing::info!(
            %run_id,
            servers = specs.len(),
            mode = ?config.startup,
            "starting tool server pool"
        );

        let mut sessions: Vec<ServerSession> = specs
            .into_iter()
            .map(|spec| {
                ServerSession::new(Arc::new(spec)).with_request_timeout(config.request_timeout())
            })
            .collect();

        let started = match config.startup {
            StartupMode::Sequential => {
                start_sequential(&mut sessions, config.handshake_timeout()).await
            }
            StartupMode::Concurrent => {
                start_concurrent(&mut sessions, config.handshake_timeout()).await
            }
        };

        if let Err((index, source)) = started {
            let server = sessions[index].label().to_string();
            tracing::warn!(
                %run_id,
                index,
                %server,
                error = %source,
                "pool startup failed, tearing down"
            );
            teardown(&sessions, config.shutdown_grace()).await;
            return Err(McpError::PoolStartup {
                index,
                server,
                source: Box::new(source),
            });
        }

        Ok(Self::assemble(run_id, sessions, config.shutdown_grace()))
    }

    /// Wrap fully started sessions into a ready pool.
    fn assemble(run_id: Uuid, sessions: Vec<ServerSession>, shutdown_grace: Duration) -> Self {
        let index = ToolIndex::build(&sessions);
        let tool_count: usize = sessions.iter().map(|s| s.tools().len()).sum();
        tracing::info!(
            %run_id,
            servers = sessions.len(),
            tool_count,
            shadowed = index.shadowed(),
            "tool server pool ready"
        );

        Self {
            run_id,
            sessions,
            index,
            state: Mutex::new(PoolState::Ready),
            shutdown_grace,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    pub fn sessions(&self) -> &[ServerSession] {
        &self.sessions
    }

    pub fn session(&self, label: &str) -> Option<&ServerSession> {
        self.sessions.iter().find(|s| s.label() == label)
    }

    /// The merged tool catalogue. Only available while the pool is ready.
    pub fn registry(&self) -> Result<ToolRegistry<'_>, McpError> {
        match self.state() {
            PoolState::Ready => Ok(ToolRegistry::with_index(&self.sessions, &self.index)),
            state => Err(McpError::PoolNotReady { state }),
        }
    }

    /// Dispatch one tool call to whichever server owns `tool`.
    pub async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        self.registry()?.call(tool, arguments).await
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        self.sessions.iter().map(ServerSession::status).collect()
    }

    /// Stop every server, last-started first. Calling it again is a no-op
    /// that reports each server as already stopped.
    pub async fn shutdown(&self) -> ShutdownReport {
        let previous = std::mem::replace(&mut *self.state.lock(), PoolState::Stopped);
        if previous == PoolState::Ready {
            tracing::info!(run_id = %self.run_id, "shutting down tool server pool");
        }
        let report = teardown(&self.sessions, self.shutdown_grace).await;
        for err in &report.errors {
            tracing::warn!(
                run_id = %self.run_id,
                error = %err,
                "error during tool server shutdown"
            );
        }
        report
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        if *self.state.get_mut() == PoolState::Ready {
            // Children are spawned kill-on-drop, so they die with their transports.
            tracing::warn!(
                run_id = %self.run_id,
                "session pool dropped without shutdown, killing tool servers"
            );
        }
    }
}

/// Start a pool, run `f` with it, and shut it down whatever `f` returns.
///
/// If the returned future is dropped before completion, the pool is dropped
/// with it and every child process is killed.
pub async fn run_scoped<F, Fut, T>(config: &PoolConfig, f: F) -> Result<T, McpError>
where
    F: FnOnce(Arc<SessionPool>) -> Fut,
    Fut: Future<Output = T>,
{
    let pool = Arc::new(SessionPool::start(config).await?);
    let output = f(pool.clone()).await;
    let report = pool.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(errors = report.errors.len(), "tool server pool did not shut down cleanly");
    }
    Ok(output)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type StartFailure = (usize, McpError);

fn validate_and_launch(index: usize, session: &mut ServerSession) -> Result<(), StartFailure> {
    session.spec().validate().map_err(|source| {
        (
            index,
            McpError::InvalidSpec {
                server: session.label().to_string(),
                source,
            },
        )
    })?;
    session.launch().map_err(|e| (index, e))
}

async fn start_sequential(
    sessions: &mut [ServerSession],
    timeout: Duration,
) -> Result<(), StartFailure> {
    for (index, session) in sessions.iter_mut().enumerate() {
        validate_and_launch(index, session)?;
        session.handshake(timeout).await.map_err(|e| (index, e))?;
    }
    Ok(())
}

/// Validate everything, spawn in order, then handshake all at once.
async fn start_concurrent(
    sessions: &mut [ServerSession],
    timeout: Duration,
) -> Result<(), StartFailure> {
    for (index, session) in sessions.iter().enumerate() {
        session.spec().validate().map_err(|source| {
            (
                index,
                McpError::InvalidSpec {
                    server: session.label().to_string(),
                    source,
                },
            )
        })?;
    }
    for (index, session) in sessions.iter_mut().enumerate() {
        session.launch().map_err(|e| (index, e))?;
    }

    let handshakes = sessions.iter_mut().map(|s| s.handshake(timeout));
    let results = futures_util::future::join_all(handshakes).await;

    match results.into_iter().enumerate().find_map(|(i, r)| r.err().map(|e| (i, e))) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

/// Shut sessions down in reverse order, collecting failures.
async fn teardown(sessions: &[ServerSession], grace: Duration) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    for session in sessions.iter().rev() {
        match session.shutdown(grace).await {
            Ok(outcome) => report.sessions.push(SessionShutdown {
                server: session.label().to_string(),
                outcome,
            }),
            Err(e) => report.errors.push(e.to_string()),
        }
    }
    report
}
