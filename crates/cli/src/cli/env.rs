//! Shared environment resolution for the `[env]` section.

use std::collections::BTreeMap;

use anyhow::Context;

use tp_domain::config::EnvConfig;

/// Read the dotenv file (if any), layer `[env.vars]` on top, and check
/// that every required variable is available.
///
/// The current process environment is only consulted, never modified.
pub fn resolve(env: &EnvConfig) -> anyhow::Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();

    if let Some(file) = &env.file {
        let entries = dotenv::from_path_iter(file)
            .with_context(|| format!("reading env file {}", file.display()))?;
        for entry in entries {
            let (key, value) =
            entry.with_context(|| format!("parsing env file {}", file.display()))?;
            resolved.insert(key, value);
        }
        tracing::debug!(file = %file.display(), vars = resolved.len(), "loaded env file");
    }

    resolved.extend(env.vars.iter().map(|(k, v)| (k.clone(), v.clone())));

    let missing = env.missing_required(&resolved, |name| std::env::var_os(name).is_some());
    if !missing.is_empty() {
        anyhow::bail!("required environment variables not set: {}", missing.join(", "));
    }

    Ok(resolved)
}
