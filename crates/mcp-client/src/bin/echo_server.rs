//! Reference MCP tool server speaking newline-delimited JSON-RPC on stdio.
//!
//! Every advertised tool echoes its arguments back as text, except:
//!
//! - `crash`: exit immediately without answering
//! - `fail` : answer with `isError: true`
//! - `sleep`: wait `ms` milliseconds, then answer
//! - `env`  : answer with the value of environment variable `name`
//!
//! Usage:
//!   tp-echo-server [--name NAME] [--tools a,b,c] [--page-size N]
//!                  [--pid-file PATH] [--stderr-flood N]
//!                  [--no-handshake] [--garbage] [--linger]
//!
//! The server exits when stdin closes, unless `--linger` is given.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tp_mcp_client::protocol::{JsonRpcResponse, PROTOCOL_VERSION};

struct Options {
    name: String,
    tools: Vec<String>,
    page_size: usize,
    pid_file: Option<PathBuf>,
    stderr_flood: usize,
    no_handshake: bool,
    garbage: bool,
    linger: bool,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut opts = Options {
        name: "tp-echo-server".into(),
        tools: vec!["echo".into()],
        page_size: 0,
        pid_file: None,
        stderr_flood: 0,
        no_handshake: false,
        garbage: false,
        linger: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--name" => opts.name = value("--name")?,
            "--tools" => {
                opts.tools = value("--tools")?
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect();
            }
            "--page-size" => opts.page_size = value("--page-size")?.parse()?,
            "--pid-file" => opts.pid_file = Some(value("--pid-file")?.into()),
            "--stderr-flood" => opts.stderr_flood = value("--stderr-flood")?.parse()?,
            "--no-handshake" => opts.no_handshake = true,
            "--garbage" => opts.garbage = true,
            "--linger" => opts.linger = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(opts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = parse_args()?;

    if let Some(path) = &opts.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }

    // Enough stderr to fill a pipe buffer several times over.
    for i in 0..opts.stderr_flood {
        eprintln!("{}: stderr flood line {i} {}", opts.name, "x".repeat(120));
    }

    tracing::info!(name = %opts.name, tools = ?opts.tools, "echo server ready");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let garbage = opts.garbage;
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if garbage {
                let _ = stdout.write_all(b"this is not json\n").await;
            }
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let msg: Value = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed request");
                continue;
            }
        };

        // Notifications carry no id and get no answer.
        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            tracing::debug!(method = ?msg.get("method"), "notification");
            continue;
        };
        let method = msg.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        if method == "initialize" && opts.no_handshake {
            tracing::info!("withholding initialize response");
            continue;
        }

        let response = match method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": opts.name, "version": env!("CARGO_PKG_VERSION") }
                }),
            ),
            "tools/list" => JsonRpcResponse::success(id, list_tools(&opts, &params)),
            "tools/call" => {
                let tx = tx.clone();
                let known = opts.tools.clone();
                tokio::spawn(async move {
                    let resp = call_tool(id, &known, params).await;
                    send(&tx, &resp);
                });
                continue;
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => JsonRpcResponse::failure(id, -32601, format!("Method not found: {other}")),
        };
        send(&tx, &response);
    }

    tracing::info!("stdin closed");
    if opts.linger {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => tracing::error!(error = %e, "failed to encode response"),
    }
}

fn tool_def(name: &str) -> Value {
    let properties = match name {
        "sleep" => json!({ "ms": { "type": "integer" } }),
        "env" => json!({ "name": { "type": "string" } }),
        _ => json!({ "text": { "type": "string" } }),
    };
    let required = match name {
        "sleep" => json!(["ms"]),
        "env" => json!(["name"]),
        _ => json!([]),
    };
    json!({
        "name": name,
        "description": format!("{name} (tp-echo-server)"),
        "inputSchema": { "type": "object", "properties": properties, "required": required }
    })
}

fn list_tools(opts: &Options, params: &Value) -> Value {
    let all: Vec<Value> = opts.tools.iter().map(|t| tool_def(t)).collect();
    if opts.page_size == 0 {
        return json!({ "tools": all });
    }

    let start: usize = params
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let end = (start + opts.page_size).min(all.len());
    let page = all.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
    if end < all.len() {
        json!({ "tools": page, "nextCursor": end.to_string() })
    } else {
        json!({ "tools": page })
    }
}

async fn call_tool(id: u64, known: &[String], params: Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    if !known.iter().any(|t| t == name) {
        return JsonRpcResponse::failure(id, -32602, format!("Unknown tool: {name}"));
    }

    tracing::info!(tool = name, "tool call");
    let text = match name {
        "crash" => {
            tracing::warn!("crashing on request");
            std::process::exit(3);
        }
        "fail" => {
            return JsonRpcResponse::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": "requested failure" }],
                    "isError": true
                }),
            );
        }
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            format!("slept {ms}ms")
        }
        "env" => {
            let var = args.get("name").and_then(Value::as_str).unwrap_or_default();
            std::env::var(var).unwrap_or_default()
        }
        _ => args.to_string(),
    };

    JsonRpcResponse::success(id, json!({ "content": [{ "type": "text", "text": text }] }))
}
