use std::path::Path;

use super::DEFAULT_CONFIG_PATH;

// ── Tool server presets ──────────────────────────────────────────────

struct ServerPreset {
    name: &'static str,
    script: &'static str,
}

const ACCOUNTS: ServerPreset = ServerPreset {
    name: "accounts",
    script: "accounts_server.py",
};

const PUSH: ServerPreset = ServerPreset {
    name: "push",
    script: "push_server.py",
};

const MARKET: ServerPreset = ServerPreset {
    name: "market",
    script: "market_server.py",
};

// ── Public entry point ───────────────────────────────────────────────

/// Write a starter `toolpool.toml` in the current directory.
pub fn init(force: bool) -> anyhow::Result<()> {
    init_in(Path::new("."), force)
}

// ── Core implementation (directory-parameterised for testability) ─────

fn init_in(base: &Path, force: bool) -> anyhow::Result<()> {
    let config_path = base.join(DEFAULT_CONFIG_PATH);

    if config_path.exists() && !force {
        anyhow::bail!("{DEFAULT_CONFIG_PATH} already exists. Use --force to overwrite it.");
    }

    std::fs::write(&config_path, render_config(&[ACCOUNTS, PUSH, MARKET]))?;

    eprintln!();
    eprintln!("  Wrote {}", config_path.display());
    eprintln!();
    eprintln!("  Next steps:");
    eprintln!("    1. Adjust the [[pool.servers]] entries to match your tool servers");
    eprintln!("    2. Put credentials in .env (see [env])");
    eprintln!("    3. Run: toolpool doctor");
    eprintln!();

    Ok(())
}

fn render_config(servers: &[ServerPreset]) -> String {
    let mut out = String::from(
        r#"# toolpool configuration

[pool]
handshake_timeout_ms = 30000
request_timeout_ms = 60000
shutdown_grace_ms = 5000
startup = "sequential"
"#,
    );

    for server in servers {
        out.push_str(&format!(
            r#"
[[pool.servers]]
name = "{name}"
command = "uv"
args = ["run", "{script}"]
"#,
            name = server.name,
            script = server.script,
        ));
    }

    out.push_str(
        r#"
[env]
# file = ".env"
required = []

[env.vars]

[logging]
format = "compact"
filter = "warn"
"#,
    );
    out
}
