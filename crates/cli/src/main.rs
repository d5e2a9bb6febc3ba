use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tp_cli::cli::{self, Cli, Command, ConfigCommand};
use tp_domain::config::{Config, LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let explicit = cli.config.as_deref();

    match cli.command {
        Command::Tools { json } => {
            let (config, _) = load(explicit)?;
            let pool_config = cli::pool_config(&config)?;
            cli::tools::run(&pool_config, json).await
        }
        Command::Call { tool, arguments, json } => {
            let (config, _) = load(explicit)?;
            let pool_config = cli::pool_config(&config)?;
            let ok = cli::call::run(&pool_config, &tool, arguments.as_deref(), json).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve => {
            let (config, _) = load(explicit)?;
            let pool_config = cli::pool_config(&config)?;
            cli::serve::run(&pool_config).await
        }
        Command::Doctor => {
            let (config, config_path) = load(explicit)?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config(explicit)?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config(explicit)?;
            cli::config::show(&config)
        }
        Command::Init { force } => cli::init::init(force),
        Command::Version => {
            println!("toolpool {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load the config and install tracing from its `[logging]` section.
fn load(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let (config, path) = cli::load_config(explicit)?;
    init_tracing(&config.logging);
    tracing::debug!(path = %path.display(), "loaded config");
    Ok((config, path))
}

/// Install the tracing subscriber. Output goes to stderr; stdout carries
/// command output and `serve` responses.
///
/// `RUST_LOG` wins over `[logging].filter`; an unparsable filter falls
/// back to `warn`.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
