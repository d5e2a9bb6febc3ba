//! End-to-end pool tests against real child processes.
#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::json;
use tp_domain::config::{PoolConfig, ProcessSpec, StartupMode};
use tp_mcp_client::{run_scoped, ExitOutcome, McpError, PoolState, SessionPool, SessionState};

const ECHO: &str = env!("CARGO_BIN_EXE_tp-echo-server");

fn echo(name: &str, tools: &str, dir: &Path) -> ProcessSpec {
    echo_with(name, tools, dir, &[])
}

/// An echo server that records its pid in `dir/<name>.pid`.
fn echo_with(name: &str, tools: &str, dir: &Path, extra: &[&str]) -> ProcessSpec {
    let pid_file = dir.join(format!("{name}.pid"));
    let mut args = vec!["--name", name, "--tools", tools, "--pid-file", pid_file.to_str().unwrap()];
    args.extend_from_slice(extra);
    ProcessSpec::new(ECHO).with_name(name).with_args(args)
}

fn sh(name: &str, script: &str) -> ProcessSpec {
    ProcessSpec::new("sh").with_name(name).with_args(["-c", script])
}

fn config(servers: Vec<ProcessSpec>) -> PoolConfig {
    let mut config = PoolConfig::new(servers);
    config.handshake_timeout_ms = 10_000;
    config.shutdown_grace_ms = 2_000;
    config
}

fn read_pid(dir: &Path, name: &str) -> u32 {
    std::fs::read_to_string(dir.join(format!("{name}.pid")))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

/// Live and not a zombie.
fn is_running(pid: u32) -> bool {
    let alive = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !alive {
        return false;
    }
    std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .map(|out| !String::from_utf8_lossy(&out.stdout).trim_start().starts_with('Z'))
        .unwrap_or(true)
}

/// Reaping after a kill can lag slightly behind the call that triggered it.
async fn assert_gone(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_running(pid) {
        assert!(Instant::now() < deadline, "process {pid} is still running");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn failed_startup_leaves_no_processes() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("broken.pid");
    let broken = sh("broken", &format!("echo $$ > {}; exit 1", pid_file.display()));

    let err = SessionPool::start(&config(vec![echo("accounts", "get_balance", dir.path()), broken]))
        .await
        .err()
        .unwrap();

    match &err {
        McpError::PoolStartup { index, server, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(server, "broken");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.root(), McpError::Protocol { .. }), "{err}");

    assert_gone(read_pid(dir.path(), "accounts")).await;
    assert_gone(read_pid(dir.path(), "broken")).await;
}

#[tokio::test]
async fn immediate_exit_fails_startup() {
    let err = SessionPool::start(&config(vec![sh("exit", "exit 1")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::PoolStartup { index: 0, .. }), "{err}");
}

#[tokio::test]
async fn two_servers_expose_union_and_stop_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![
        echo("accounts", "get_balance,buy_shares", dir.path()),
        echo("market", "lookup_share_price", dir.path()),
    ]))
    .await
    .unwrap();

    assert_eq!(pool.state(), PoolState::Ready);
    let registry = pool.registry().unwrap();
    let names: Vec<_> = registry.list_tools().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["get_balance", "buy_shares", "lookup_share_price"]);
    assert_eq!(registry.resolve("lookup_share_price").unwrap().label(), "market");
    assert_eq!(pool.sessions()[1].server_info().unwrap().name, "market");

    let result = pool
        .invoke("get_balance", json!({ "text": "Warren" }))
        .await
        .unwrap();
    assert_eq!(result.text(), r#"{"text":"Warren"}"#);

    let pids = [read_pid(dir.path(), "accounts"), read_pid(dir.path(), "market")];
    assert_eq!(pool.sessions()[0].pid(), Some(pids[0]));

    let started = Instant::now();
    let report = pool.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.is_clean(), "{:?}", report.errors);
    // Reverse of startup order.
    let order: Vec<_> = report.sessions.iter().map(|s| s.server.as_str()).collect();
    assert_eq!(order, ["market", "accounts"]);
    assert!(report
        .sessions
        .iter()
        .all(|s| s.outcome == ExitOutcome::Exited { code: Some(0) }));

    for pid in pids {
        assert_gone(pid).await;
    }
}

#[tokio::test]
async fn unknown_tool_leaves_pool_ready() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![echo("accounts", "get_balance", dir.path())]))
        .await
        .unwrap();

    let err = pool.invoke("nonexistent_tool", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::UnknownTool { ref tool } if tool == "nonexistent_tool"));
    assert_eq!(pool.state(), PoolState::Ready);
    assert_eq!(pool.sessions()[0].state(), SessionState::Ready);

    pool.shutdown().await;
}

#[tokio::test]
async fn crash_mid_invoke_only_affects_that_server() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![
        echo("accounts", "crash,get_balance", dir.path()),
        echo("market", "lookup_share_price", dir.path()),
    ]))
    .await
    .unwrap();

    let err = pool.invoke("crash", json!({})).await.unwrap_err();
    assert!(
        matches!(err, McpError::SessionDead { .. } | McpError::ToolExecution { .. }),
        "{err}"
    );
    assert_eq!(pool.session("accounts").unwrap().state(), SessionState::Stopped);
    assert_eq!(pool.session("market").unwrap().state(), SessionState::Ready);

    let err = pool.invoke("get_balance", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::SessionDead { .. }), "{err}");

    let result = pool
        .invoke("lookup_share_price", json!({ "text": "AAPL" }))
        .await
        .unwrap();
    assert_eq!(result.text(), r#"{"text":"AAPL"}"#);

    let report = pool.shutdown().await;
    assert!(report.is_clean(), "{:?}", report.errors);
}

#[tokio::test]
async fn shutdown_twice_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![echo("accounts", "get_balance", dir.path())]))
        .await
        .unwrap();

    let first = pool.shutdown().await;
    assert!(first.is_clean());
    let second = pool.shutdown().await;
    assert!(second.is_clean());
    assert!(second
        .sessions
        .iter()
        .all(|s| s.outcome == ExitOutcome::AlreadyStopped));
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(pool.sessions()[0].state(), SessionState::Stopped);
    assert!(matches!(pool.registry(), Err(McpError::PoolNotReady { .. })));
}

#[tokio::test]
async fn earlier_server_wins_and_env_is_per_server() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![
        echo("first", "env", dir.path()).with_env("WHO", "first"),
        echo("second", "env", dir.path()).with_env("WHO", "second"),
    ]);
    cfg.shared_env.insert("WHO".into(), "shared".into());
    cfg.shared_env.insert("DESK".into(), "equities".into());
    let pool = SessionPool::start(&cfg).await.unwrap();

    let registry = pool.registry().unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.resolve("env").unwrap().label(), "first");

    let who = pool.invoke("env", json!({ "name": "WHO" })).await.unwrap();
    assert_eq!(who.text(), "first");
    let desk = pool.invoke("env", json!({ "name": "DESK" })).await.unwrap();
    assert_eq!(desk.text(), "equities");
    // Inherited from this process.
    let path = pool.invoke("env", json!({ "name": "PATH" })).await.unwrap();
    assert!(!path.text().is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![echo_with("silent", "echo", dir.path(), &["--no-handshake"])]);
    cfg.handshake_timeout_ms = 300;

    let err = SessionPool::start(&cfg).await.err().unwrap();
    assert!(matches!(err.root(), McpError::HandshakeTimeout { .. }), "{err}");
    assert_gone(read_pid(dir.path(), "silent")).await;
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let err = SessionPool::start(&config(vec![ProcessSpec::new("/nonexistent/tp-tool-server")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err.root(), McpError::Spawn { .. }), "{err}");
}

#[tokio::test]
async fn handshake_failure_carries_stderr() {
    let err = SessionPool::start(&config(vec![sh(
        "noisy",
        "echo 'missing API key' >&2; sleep 0.3; exit 2",
    )]))
    .await
    .err()
    .unwrap();
    assert!(err.to_string().contains("missing API key"), "{err}");
}

#[tokio::test]
async fn stderr_flood_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let spec = echo_with("chatty", "echo", dir.path(), &["--stderr-flood", "5000"]);
    let pool = SessionPool::start(&config(vec![spec])).await.unwrap();

    let result = pool.invoke("echo", json!({ "text": "still here" })).await.unwrap();
    assert_eq!(result.text(), r#"{"text":"still here"}"#);
    pool.shutdown().await;
}

#[tokio::test]
async fn non_json_stdout_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let spec = echo_with("messy", "echo", dir.path(), &["--garbage"]);
    let pool = SessionPool::start(&config(vec![spec])).await.unwrap();
    assert!(pool.invoke("echo", json!({})).await.is_ok());
    pool.shutdown().await;
}

#[tokio::test]
async fn paginated_tool_lists_are_followed() {
    let dir = tempfile::tempdir().unwrap();
    let spec = echo_with("paged", "a,b,c", dir.path(), &["--page-size", "1"]);
    let pool = SessionPool::start(&config(vec![spec])).await.unwrap();
    let names: Vec<_> = pool
        .registry()
        .unwrap()
        .list_tools()
        .into_iter()
        .map(|(n, _)| n.to_string())
        .collect();
    assert_eq!(names, ["a", "b", "c"]);
    pool.shutdown().await;
}

#[tokio::test]
async fn concurrent_startup_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![
        echo("accounts", "get_balance", dir.path()),
        echo("push", "push", dir.path()),
        echo("market", "lookup_share_price", dir.path()),
    ]);
    cfg.startup = StartupMode::Concurrent;

    let pool = SessionPool::start(&cfg).await.unwrap();
    assert_eq!(pool.registry().unwrap().len(), 3);
    assert!(pool.sessions().iter().all(|s| s.state() == SessionState::Ready));
    pool.shutdown().await;

    cfg.servers.insert(1, sh("broken", "exit 1"));
    let err = SessionPool::start(&cfg).await.err().unwrap();
    assert!(matches!(err, McpError::PoolStartup { index: 1, .. }), "{err}");
    for name in ["accounts", "push", "market"] {
        assert_gone(read_pid(dir.path(), name)).await;
    }
}

#[tokio::test]
async fn stubborn_server_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![echo_with("stubborn", "echo", dir.path(), &["--linger"])]);
    cfg.shutdown_grace_ms = 200;
    let pool = SessionPool::start(&cfg).await.unwrap();

    let report = pool.shutdown().await;
    assert_eq!(report.sessions[0].outcome, ExitOutcome::Killed);
    assert_gone(read_pid(dir.path(), "stubborn")).await;
}

#[tokio::test]
async fn slow_tool_times_out_without_killing_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![echo("slow", "sleep,echo", dir.path())]);
    cfg.request_timeout_ms = 200;
    let pool = SessionPool::start(&cfg).await.unwrap();

    let err = pool.invoke("sleep", json!({ "ms": 2000 })).await.unwrap_err();
    assert!(matches!(err, McpError::InvokeTimeout { .. }), "{err}");
    assert_eq!(pool.sessions()[0].state(), SessionState::Ready);

    let result = pool.invoke("echo", json!({ "text": "after" })).await.unwrap();
    assert_eq!(result.text(), r#"{"text":"after"}"#);
    pool.shutdown().await;
}

#[tokio::test]
async fn late_reply_after_timeout_does_not_confuse_later_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(vec![echo("slow", "sleep,echo", dir.path())]);
    cfg.request_timeout_ms = 200;
    let pool = SessionPool::start(&cfg).await.unwrap();

    let err = pool.invoke("sleep", json!({ "ms": 500 })).await.unwrap_err();
    assert!(matches!(err, McpError::InvokeTimeout { .. }), "{err}");

    // The `sleep` reply lands while nobody is waiting for it.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(pool.sessions()[0].state(), SessionState::Ready);

    let result = pool.invoke("echo", json!({ "text": "after" })).await.unwrap();
    assert_eq!(result.text(), r#"{"text":"after"}"#);
    pool.shutdown().await;
}

#[tokio::test]
async fn concurrent_calls_share_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![echo("accounts", "sleep", dir.path())]))
        .await
        .unwrap();

    let calls = (1..=5).map(|i| pool.invoke("sleep", json!({ "ms": 100 * i })));
    let results = futures_util::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().text(), format!("slept {}ms", 100 * (i + 1)));
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn server_reported_failure_is_tool_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![echo("accounts", "fail", dir.path())]))
        .await
        .unwrap();

    let err = pool.invoke("fail", json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "tool fail failed: requested failure");
    assert_eq!(pool.sessions()[0].state(), SessionState::Ready);
    pool.shutdown().await;
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let pool = SessionPool::start(&config(vec![echo("accounts", "sleep", dir.path())]))
        .await
        .unwrap();

    let err = pool.invoke("sleep", json!({ "ms": "soon" })).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidArguments { .. }), "{err}");
    pool.shutdown().await;
}

#[tokio::test]
async fn run_scoped_always_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(vec![echo("accounts", "get_balance", dir.path())]);

    let text = run_scoped(&cfg, |pool| async move {
        pool.invoke("get_balance", json!({ "text": "Warren" }))
            .await
            .map(|r| r.text())
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(text, r#"{"text":"Warren"}"#);
    assert_gone(read_pid(dir.path(), "accounts")).await;
}

#[tokio::test]
async fn dropped_pool_kills_its_servers() {
    let dir = tempfile::tempdir().unwrap();
    let leaky = echo_with("leaky", "echo", dir.path(), &["--linger"]);
    let pool = SessionPool::start(&config(vec![leaky])).await.unwrap();
    let pid = read_pid(dir.path(), "leaky");
    assert!(is_running(pid));

    drop(pool);
    assert_gone(pid).await;
}
