use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `[env]` section: credentials and endpoints handed to every tool server.
///
/// Resolved exactly once before the pool starts: the dotenv `file` is read
/// first, then `vars` are layered on top. The toolpool process's own
/// environment is never modified.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvConfig {
    /// Optional dotenv-format file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Explicit variables; these win over values from `file`.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Variables that must be set (resolved or inherited) before startup.
    #[serde(default)]
    pub required: Vec<String>,
}

impl EnvConfig {
    /// Names in `required` that are neither in `resolved` nor visible
    /// through `inherited`.
    pub fn missing_required<F>(
        &self,
        resolved: &BTreeMap<String, String>,
        inherited: F,
    ) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.required
            .iter()
            .filter(|name| !resolved.contains_key(name.as_str()) && !inherited(name))
            .cloned()
            .collect()
    }
}
