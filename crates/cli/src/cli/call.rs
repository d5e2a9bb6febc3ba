//! `toolpool call`: one-shot tool invocation.

use anyhow::Context;
use serde_json::Value;

use tp_domain::config::PoolConfig;
use tp_mcp_client::run_scoped;

/// Invoke `tool` once. Returns `Ok(false)` when the tool call itself failed
/// (the error has already been printed).
pub async fn run(
    pool_config: &PoolConfig,
    tool: &str,
    arguments: Option<&str>,
    json_output: bool,
) -> anyhow::Result<bool> {
    let arguments = parse_arguments(arguments)?;

    let outcome = run_scoped(pool_config, |pool| async move { pool.invoke(tool, arguments).await })
        .await
        .context("starting tool servers")?;

    match outcome {
        Ok(result) if json_output => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(true)
        }
        Ok(result) => {
            println!("{}", result.text());
            Ok(true)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(false)
        }
    }
}

fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).context("arguments must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("arguments must be a JSON object");
    }
    Ok(value)
}
