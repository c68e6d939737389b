//! `vpsctl validate`

use anyhow::Result;
use colored::Colorize;
use declarative::ResourceKind;
use std::collections::BTreeMap;

use crate::Context;
use crate::engine;
use crate::paths;
use crate::state::SecretsStore;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let (config_path, config) = super::load_config(ctx)?;
    let store = SecretsStore::load(&paths::secrets_file(&paths::state_dir()))?;
    let prepared = engine::prepare(&config, &store, None)?;

    if ctx.quiet {
        return Ok(());
    }

    ui::header("Host Description");
    ui::kv("Config", &config_path.display().to_string());
    ui::kv("Resources", &prepared.plan.len().to_string());

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for resource in prepared.plan.iter() {
        let kind: ResourceKind = resource.kind();
        *by_kind.entry(kind.label()).or_default() += 1;
    }
    for (label, count) in &by_kind {
        println!("    {:<22} {}", label, count.to_string().bold());
    }

    println!();
    ui::success("Configuration and dependency graph are valid");
    Ok(())
}
