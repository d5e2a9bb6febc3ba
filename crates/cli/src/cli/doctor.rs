use std::path::Path;

use tp_domain::config::{Config, ConfigSeverity, PoolConfig};
use tp_mcp_client::SessionPool;

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &Path) -> anyhow::Result<bool> {
    println!("toolpool doctor");
    println!("===============\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Shared environment
    let pool_config = check_env(config, &mut all_passed);

    // 4. Each tool server, started on its own
    if let Some(pool_config) = pool_config {
        check_servers(&pool_config, &mut all_passed).await;
    }

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &Path, all_passed: &mut bool) {
    let exists = config_path.exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.display().to_string()
        } else {
            format!("{} not found (using defaults)", config_path.display())
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_env(config: &Config, all_passed: &mut bool) -> Option<PoolConfig> {
    match super::pool_config(config) {
        Ok(pool_config) => {
            print_check(
                "Shared environment",
                true,
                format!("{} variable(s) resolved", pool_config.shared_env.len()),
            );
            Some(pool_config)
        }
        Err(e) => {
            print_check("Shared environment", false, format!("{e:#}"));
            *all_passed = false;
            None
        }
    }
}

async fn check_servers(pool_config: &PoolConfig, all_passed: &mut bool) {
    for spec in &pool_config.servers {
        let single = PoolConfig {
            servers: vec![spec.clone()],
            ..pool_config.clone()
        };
        let name = format!("Tool server {}", spec.label());

        match SessionPool::start(&single).await {
            Ok(pool) => {
                let tools: Vec<String> = pool
                    .sessions()
                    .iter()
                    .flat_map(|s| s.tools().iter().map(|t| t.name.clone()))
                    .collect();
                print_check(&name, true, format!("{} tool(s): {}", tools.len(), tools.join(", ")));
                pool.shutdown().await;
            }
            Err(e) => {
                print_check(&name, false, e.root().to_string());
                *all_passed = false;
            }
        }
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
