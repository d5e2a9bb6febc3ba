//! MCP transport layer.
//!
//! A transport carries JSON-RPC between a session and one tool server. The
//! stdio transport spawns the server as a child process and runs three
//! background tasks per child:
//!
//! - **writer**: owns stdin; whole lines are queued to it over a channel so a
//!   cancelled caller can never leave half a message on the pipe.
//! - **reader**: drains stdout and routes each response to the caller waiting
//!   on its `id`. Responses nobody waits for any more are dropped.
//! - **stderr**: drains stderr into `tracing` and keeps a short tail for
//!   error messages.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tp_domain::config::ProcessSpec;

use crate::protocol::{self, Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait up to `timeout` for its response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// OS process id of the server, when there is one.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// The most recent diagnostic lines the server wrote.
    fn stderr_tail(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ask the server to exit, wait up to `grace`, then force it.
    ///
    /// Calling this more than once returns [`ExitOutcome::AlreadyStopped`].
    async fn shutdown(&self, grace: Duration) -> Result<ExitOutcome, TransportError>;
}

/// How a server went away during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Exited on its own within the grace period.
    Exited { code: Option<i32> },
    /// Still running after the grace period and was killed.
    Killed,
    /// Shutdown had already run.
    AlreadyStopped,
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool server process has exited")]
    ProcessExited,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum number of consecutive non-JSON lines before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// How many stderr lines to keep for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the I/O tasks to wind down once the process is gone.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// State shared between the transport handle and its background tasks.
struct Shared {
    server: String,
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    alive: AtomicBool,
    stderr_tail: Mutex<VecDeque<String>>,
}

impl Shared {
    /// Refuse new requests and fail every in-flight one.
    ///
    /// `alive` is cleared before the pending map so a request registered
    /// concurrently either sees `alive == false` or gets dropped here.
    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    fn complete(&self, resp: JsonRpcResponse) {
        let waiter = self.pending.lock().remove(&resp.id);
        match waiter {
            Some(tx) => {
                if tx.send(resp).is_err() {
                    tracing::debug!(server = %self.server, "caller went away, discarding response");
                }
            }
            None => {
                tracing::debug!(
                    server = %self.server,
                    id = resp.id,
                    "discarding late or unsolicited response"
                );
            }
        }
    }
}

/// Removes a pending entry when the waiting caller finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

/// Stdio transport: communicates with a child process over stdin/stdout.
///
/// Each JSON-RPC message is a single newline-delimited line. Requests carry
/// increasing integer ids, so several may be in flight at once.
pub struct StdioTransport {
    shared: Arc<Shared>,
    /// Queue feeding the writer task. Taking it closes the child's stdin.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn the tool server described by `spec`.
    ///
    /// The child inherits this process's environment plus `spec.env`, and is
    /// killed if the transport is dropped without a shutdown.
    pub fn spawn(spec: &ProcessSpec) -> std::io::Result<Self> {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let pid = child.id();

        let shared = Arc::new(Shared {
            server: spec.label(),
            pending: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
            stderr_tail: Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(write_loop(stdin, rx, shared.clone())),
            tokio::spawn(read_loop(stdout, shared.clone())),
            tokio::spawn(drain_stderr(stderr, shared.clone())),
        ];

        tracing::debug!(server = %shared.server, pid, "spawned tool server process");

        Ok(Self {
            shared,
            outbound: Mutex::new(Some(tx)),
            child: tokio::sync::Mutex::new(Some(child)),
            tasks: Mutex::new(tasks),
            next_id: AtomicU64::new(1),
            pid,
        })
    }

    fn enqueue(&self, line: String) -> Result<(), TransportError> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(line).map_err(|_| TransportError::ProcessExited),
            None => Err(TransportError::ProcessExited),
        }
    }

    async fn finish_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            // A grandchild holding the pipes open would keep a task alive.
            let abort = task.abort_handle();
            if tokio::time::timeout(TASK_DRAIN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        let _pending = PendingGuard {
            shared: &self.shared,
            id,
        };

        if !self.shared.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        self.enqueue(line)?;
        tracing::debug!(server = %self.shared.server, id, method, "sent MCP request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::ProcessExited),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.shared.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let json = serde_json::to_string(&JsonRpcNotification::new(method))?;
        tracing::debug!(server = %self.shared.server, method, "sending MCP notification");
        self.enqueue(json)
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.shared.stderr_tail.lock().iter().cloned().collect()
    }

    async fn shutdown(&self, grace: Duration) -> Result<ExitOutcome, TransportError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(ExitOutcome::AlreadyStopped);
        };

        self.shared.alive.store(false, Ordering::SeqCst);
        // Closing stdin is the stdio transport's termination signal.
        self.outbound.lock().take();

        let result = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.shared.server, ?status, "tool server exited");
                Ok(ExitOutcome::Exited {
                    code: status.code(),
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    server = %self.shared.server,
                    error = %e,
                    "error waiting for tool server"
                );
                let _ = child.kill().await;
                Err(TransportError::Io(e))
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.shared.server,
                    grace_ms = grace.as_millis() as u64,
                    "tool server did not exit within grace period, killing"
                );
                child
                    .kill()
                    .await
                    .map(|()| ExitOutcome::Killed)
                    .map_err(TransportError::Io)
            }
        };

        self.shared.mark_dead();
        self.finish_tasks().await;
        result
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The child itself is killed on drop; stop the I/O tasks with it.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn missing_pipe(name: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {name}"),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn write_loop(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    while let Some(line) = rx.recv().await {
        let written: std::io::Result<()> = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::debug!(server = %shared.server, error = %e, "tool server stdin closed");
            shared.mark_dead();
            return;
        }
    }
    // Queue closed: dropping stdin sends EOF to the server.
}

async fn read_loop<R: AsyncRead + Unpin>(stdout: R, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut skipped = 0usize;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    server = %shared.server,
                    error = %e,
                    "error reading tool server stdout"
                );
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Skip lines that don't parse as JSON (e.g. logging on stdout).
        let incoming = if trimmed.starts_with('{') {
            protocol::classify(trimmed).ok()
        } else {
            None
        };
        let Some(incoming) = incoming else {
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                tracing::warn!(
                    server = %shared.server,
                    "tool server produced too many non-JSON lines on stdout"
                );
                break;
            }
            tracing::debug!(server = %shared.server, line = %trimmed, "skipping non-JSON line");
            continue;
        };
        skipped = 0;

        match incoming {
            Incoming::Response(resp) => shared.complete(resp),
            Incoming::ServerMessage { method, id } => {
                tracing::debug!(
                    server = %shared.server,
                    method,
                    ?id,
                    "ignoring server-initiated message"
                );
            }
            Incoming::Unrecognized => {
                tracing::debug!(
                    server = %shared.server,
                    line = %trimmed,
                    "ignoring unrecognized message"
                );
            }
        }
    }

    shared.mark_dead();
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(server = %shared.server, line = %line, "tool server stderr");
        let mut tail = shared.stderr_tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
