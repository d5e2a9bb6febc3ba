//! In-memory transport for unit tests: answers requests from a closure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::protocol::JsonRpcResponse;
use crate::transport::{ExitOutcome, McpTransport, TransportError};

type Handler = dyn Fn(&str, Option<&Value>) -> Reply + Send + Sync;

/// What the scripted server does with one request.
pub enum Reply {
    Result(Value),
    Error(i64, String),
    /// Never answer.
    Hang,
    /// Behave as if the process died.
    Exit,
}

pub struct ScriptedTransport {
    handler: Box<Handler>,
    alive: Arc<AtomicBool>,
    stopped: AtomicBool,
    next_id: AtomicU64,
    pub requests: Arc<Mutex<Vec<(String, Option<Value>)>>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            alive: Arc::new(AtomicBool::new(true)),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A well-behaved server advertising `tools`; `tools/call` echoes the
    /// arguments back as text.
    pub fn with_tools(tools: Value) -> Self {
        Self::new(move |method, params| match method {
            "initialize" => Reply::Result(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "scripted", "version": "0.0.1" }
            })),
            "tools/list" => Reply::Result(json!({ "tools": tools.clone() })),
            "tools/call" => {
                let args = params.map(|p| p["arguments"].clone()).unwrap_or(Value::Null);
                Reply::Result(json!({
                    "content": [{ "type": "text", "text": args.to_string() }]
                }))
            }
            _ => Reply::Error(-32601, "Method not found".into()),
        })
    }

    /// Handle for flipping liveness after the transport is boxed.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        _timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reply = (self.handler)(method, params.as_ref());
        self.requests.lock().push((method.to_string(), params));
        match reply {
            Reply::Result(value) => Ok(JsonRpcResponse::success(id, value)),
            Reply::Error(code, message) => Ok(JsonRpcResponse::failure(id, code, message)),
            Reply::Hang => std::future::pending().await,
            Reply::Exit => {
                self.alive.store(false, Ordering::SeqCst);
                Err(TransportError::ProcessExited)
            }
        }
    }

    async fn send_notification(&self, _method: &str) -> Result<(), TransportError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ProcessExited)
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self, _grace: Duration) -> Result<ExitOutcome, TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        if self.stopped.swap(true, Ordering::SeqCst) {
            Ok(ExitOutcome::AlreadyStopped)
        } else {
            Ok(ExitOutcome::Exited { code: Some(0) })
        }
    }
}

/// A tool definition with a single required string property.
pub fn tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }
    })
}
