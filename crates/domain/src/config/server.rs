//! Tool-server process specifications.
//!
//! A [`ProcessSpec`] describes how to launch one tool server: the executable,
//! its arguments and the environment overrides layered over the inherited
//! environment. These are the `[[pool.servers]]` entries of the config file.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Launch description for a single tool server.
///
/// Equality and hashing consider only `command`, `args` and `env`; the
/// optional `name` is a display label.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessSpec {
    /// Human-readable label used in logs and tool listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The executable to spawn (e.g. `"uv"`).
    #[serde(default)]
    pub command: String,

    /// Arguments passed to the command, in order.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set on the child on top of the inherited ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Reasons a [`ProcessSpec`] is rejected before launch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("command must not be empty")]
    EmptyCommand,

    #[error("argument {index} is empty")]
    EmptyArgument { index: usize },

    #[error("argument {index} contains a NUL byte")]
    NulInArgument { index: usize },

    #[error("invalid environment variable name {name:?}")]
    InvalidEnvName { name: String },
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Label for logs: the configured name, or the command line.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ if self.args.is_empty() => self.command.clone(),
            _ => format!("{} {}", self.command, self.args.join(" ")),
        }
    }

    /// Check the spec is launchable. Has no side effects.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.command.trim().is_empty() {
            return Err(SpecError::EmptyCommand);
        }
        for (index, arg) in self.args.iter().enumerate() {
            if arg.is_empty() {
                return Err(SpecError::EmptyArgument { index });
            }
            if arg.contains('\0') {
                return Err(SpecError::NulInArgument { index });
            }
        }
        for name in self.env.keys() {
            if name.is_empty() || name.contains('=') || name.contains('\0') {
                return Err(SpecError::InvalidEnvName { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Copy of this spec with `shared` underneath its own overrides.
    ///
    /// Keys set on the spec win over the shared map.
    pub fn with_shared_env(&self, shared: &BTreeMap<String, String>) -> Self {
        let mut env = shared.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            env,
            ..self.clone()
        }
    }
}

impl PartialEq for ProcessSpec {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command && self.args == other.args && self.env == other.env
    }
}

impl Eq for ProcessSpec {}

impl Hash for ProcessSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.command.hash(state);
        self.args.hash(state);
        self.env.hash(state);
    }
}
