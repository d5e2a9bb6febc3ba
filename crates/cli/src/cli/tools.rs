//! `toolpool tools`: print the merged tool catalogue.

use tp_domain::config::PoolConfig;
use tp_domain::tool::ToolDescriptor;
use tp_mcp_client::run_scoped;

pub async fn run(pool_config: &PoolConfig, json_output: bool) -> anyhow::Result<()> {
    let descriptors = run_scoped(pool_config, |pool| async move {
        pool.registry().map(|registry| registry.descriptors())
    })
    .await??;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else {
        print!("{}", render(&descriptors));
    }
    Ok(())
}

fn render(descriptors: &[ToolDescriptor]) -> String {
    if descriptors.is_empty() {
        return "No tools available.\n".into();
    }
    let width = descriptors.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for d in descriptors {
        let summary = d.description.lines().next().unwrap_or_default();
        out.push_str(&format!("{:<width$}  [{}]  {}\n", d.name, d.server, summary));
    }
    out
}
