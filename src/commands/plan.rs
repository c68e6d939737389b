//! `vpsctl plan` - read-only preview

use anyhow::Result;
use declarative::{DiffSummary, survey};
use std::time::Duration;

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::{self, differ};
use crate::paths;
use crate::progress;
use crate::runner::SystemRunner;
use crate::state::SecretsStore;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let (config_path, config) = super::load_config(ctx)?;
    let store = SecretsStore::load(&paths::secrets_file(&paths::state_dir()))?;
    let prepared = engine::prepare(&config, &store, args.target.as_deref())?;

    if !ctx.quiet {
        ui::header("Host Plan");
        ui::kv("Config", &config_path.display().to_string());
    }
    if !crate::lock::is_root() {
        ui::warn("Not running as root; some probes may fail with permission errors");
    }

    let runner = SystemRunner::new(Duration::from_secs(config.run.command_timeout));
    let jobs = args.jobs.unwrap_or(config.run.jobs);

    let pb = progress::spinner(
        &format!("Probing {} resources...", prepared.plan.len()),
        ctx.quiet,
    );
    let diffs = survey(&prepared.plan, &runner, jobs);
    pb.finish_and_clear();
    let diffs = diffs?;

    differ::display_diff(&diffs, args.all);

    let summary = DiffSummary::from_diffs(&diffs);
    if !prepared.generated.is_empty() {
        let keys: Vec<&str> = prepared.generated.iter().map(|(k, _)| k.as_str()).collect();
        ui::dim(&format!(
            "New secrets will be generated on apply: {}",
            keys.join(", ")
        ));
    }
    if summary.has_changes() {
        println!();
        ui::info("Run `vpsctl apply` to make these changes");
    }
    Ok(())
}
