mod env;
mod logging;
mod pool;
mod server;

pub use env::*;
pub use logging::*;
pub use pool::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.pool.servers.is_empty() {
            errors.push(ConfigError::warning(
                "pool.servers",
                "no tool servers configured",
            ));
        }

        let mut seen_names = HashSet::new();
        for (i, spec) in self.pool.servers.iter().enumerate() {
            if let Err(e) = spec.validate() {
                errors.push(ConfigError::error(format!("pool.servers[{i}]"), e.to_string()));
            }
            if let Some(name) = &spec.name {
                if !seen_names.insert(name.as_str()) {
                    errors.push(ConfigError::warning(
                        format!("pool.servers[{i}].name"),
                        format!("duplicate server name {name:?}"),
                    ));
                }
            }
        }

        if self.pool.handshake_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "pool.handshake_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.pool.request_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "pool.request_timeout_ms",
                "must be greater than 0",
            ));
        }

        // Zero grace is legal but kills servers without a chance to exit.
        if self.pool.shutdown_grace_ms == 0 {
            errors.push(ConfigError::warning(
                "pool.shutdown_grace_ms",
                "0 kills servers immediately on shutdown",
            ));
        }

        if let Some(path) = &self.env.file {
            if !path.exists() {
                errors.push(ConfigError::warning(
                    "env.file",
                    format!("{} does not exist", path.display()),
                ));
            }
        }

        errors
    }
}
