pub mod call;
pub mod config;
pub mod doctor;
pub mod env;
pub mod init;
pub mod serve;
pub mod tools;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use tp_domain::config::{Config, PoolConfig};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "toolpool.toml";

/// toolpool: run MCP tool servers as one tool catalogue.
#[derive(Debug, Parser)]
#[command(name = "toolpool", version, about)]
pub struct Cli {
    /// Config file (default: $TOOLPOOL_CONFIG, then toolpool.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start every configured server and list the merged tool catalogue.
    Tools {
        /// Print tool descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Invoke a single tool and print its result.
    Call {
        /// Tool name.
        tool: String,
        /// Arguments as a JSON object (default: `{}`).
        arguments: Option<String>,
        /// Print the full result as JSON instead of its text.
        #[arg(long)]
        json: bool,
    },
    /// Serve newline-delimited JSON requests on stdin until EOF or Ctrl-C.
    Serve,
    /// Validate the configuration and try starting every server.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Write a starter toolpool.toml in the current directory.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Resolve which config file to read: `--config`, then `TOOLPOOL_CONFIG`,
/// then [`DEFAULT_CONFIG_PATH`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os("TOOLPOOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

/// Load the configuration. A missing file yields the defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = config_path(explicit);

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };

    Ok((config, path))
}

/// The pool settings with the shared environment resolved into them.
pub fn pool_config(config: &Config) -> anyhow::Result<PoolConfig> {
    let mut pool = config.pool.clone();
    pool.shared_env = env::resolve(&config.env)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = config_path(Some(Path::new("/etc/toolpool/prod.toml")));
        assert_eq!(path, PathBuf::from("/etc/toolpool/prod.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.pool.servers.is_empty());
        assert!(path.ends_with("absent.toml"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pool\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err}").contains("bad.toml"), "{err}");
    }

    #[test]
    fn cli_parses_call() {
        let cli = Cli::parse_from([
            "toolpool",
            "--config",
            "x.toml",
            "call",
            "get_balance",
            r#"{"name":"ed"}"#,
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Command::Call { tool, arguments, json } => {
                assert_eq!(tool, "get_balance");
                assert_eq!(arguments.as_deref(), Some(r#"{"name":"ed"}"#));
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
