//! `toolpool serve`: agent-runner bridge over stdin/stdout.
//!
//! Each stdin line is one [`AgentRequest`]; each answer is one
//! [`AgentResponse`] line on stdout. Calls run concurrently, so responses
//! may come back out of order and carry the request's `id`.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use tp_domain::config::PoolConfig;
use tp_domain::tool::{AgentRequest, AgentResponse};
use tp_mcp_client::SessionPool;

pub async fn run(pool_config: &PoolConfig) -> anyhow::Result<()> {
    let pool = Arc::new(SessionPool::start(pool_config).await?);
    tracing::info!(run_id = %pool.run_id(), "serving tool requests on stdin");

    let served = tokio::select! {
        res = serve_lines(pool.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };

    let report = pool.shutdown().await;
    for err in &report.errors {
        eprintln!("shutdown error: {err}");
    }
    served
}

async fn serve_lines(pool: Arc<SessionPool>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(resp) = rx.recv().await {
            let line = match serde_json::to_string(&resp) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode response");
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut inflight = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: AgentRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let _ = tx.send(AgentResponse::failure(None, format!("invalid request: {e}")));
                continue;
            }
        };

        let pool = pool.clone();
        let tx = tx.clone();
        inflight.spawn(async move {
            let resp = handle(&pool, request).await;
            let _ = tx.send(resp);
        });
    }

    // Stdin closed: let in-flight calls finish before the pool goes away.
    while inflight.join_next().await.is_some() {}
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Answer one request against a ready pool.
pub async fn handle(pool: &SessionPool, request: AgentRequest) -> AgentResponse {
    let id = request.id().cloned();
    match request {
        AgentRequest::List { .. } => match pool.registry() {
            Ok(registry) => AgentResponse::success(id, json!(registry.descriptors())),
            Err(e) => AgentResponse::failure(id, e.to_string()),
        },
        AgentRequest::Status { .. } => AgentResponse::success(
            id,
            json!({
                "run_id": pool.run_id(),
                "state": pool.state(),
                "sessions": pool.status(),
            }),
        ),
        AgentRequest::Call { tool, arguments, .. } => {
            tracing::debug!(tool = %tool, "call request");
            match pool.invoke(&tool, arguments).await {
                Ok(result) => AgentResponse::success(id, json!(result)),
                Err(e) => AgentResponse::failure(id, e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn handle_on_empty_pool() {
        let pool = SessionPool::start(&PoolConfig::default()).await.unwrap();

        let list = handle(&pool, AgentRequest::List { id: Some(json!(1)) }).await;
        assert!(list.ok);
        assert_eq!(list.id, Some(json!(1)));
        assert_eq!(list.result, Some(json!([])));

        let call = handle(
            &pool,
            AgentRequest::Call {
                id: Some(json!("c1")),
                tool: "nonexistent_tool".into(),
                arguments: json!({}),
            },
        )
        .await;
        assert!(!call.ok);
        assert_eq!(call.error.as_deref(), Some("unknown tool: nonexistent_tool"));

        let status = handle(&pool, AgentRequest::Status { id: None }).await;
        assert_eq!(status.result.unwrap()["state"], "ready");

        pool.shutdown().await;
        let list = handle(&pool, AgentRequest::List { id: None }).await;
        assert!(!list.ok);
    }
}
