//! `vpsctl apply`

use anyhow::Result;
use declarative::Verdict;
use std::time::Duration;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, ApplyOptions};
use crate::lock::{self, RunLock};
use crate::paths;
use crate::runner::SystemRunner;
use crate::signals;
use crate::state::SecretsStore;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<Verdict> {
    lock::ensure_root()?;

    let (config_path, config) = super::load_config(ctx)?;
    let state_dir = paths::state_dir();
    let lock = RunLock::acquire(&state_dir)?;
    log::debug!("Holding run lock {}", lock.path().display());
    signals::install()?;

    let mut store = SecretsStore::load(&paths::secrets_file(&state_dir))?;

    let mut policy = config.policy();
    if args.halt_on_failure {
        policy.halt_on_first_failure = true;
    }
    if let Some(secs) = args.timeout {
        policy.command_timeout = Duration::from_secs(secs);
    }

    if !ctx.quiet {
        ui::header("Applying Host Configuration");
        ui::kv("Config", &config_path.display().to_string());
        if let Some(target) = &args.target {
            ui::kv("Target", target);
        }
    }

    let runner = SystemRunner::new(policy.command_timeout);
    let opts = ApplyOptions {
        target: args.target,
        jobs: args.jobs.unwrap_or(config.run.jobs),
        policy,
        yes: args.yes,
        show_secrets: args.show_secrets,
        quiet: ctx.quiet,
        verbose: ctx.verbose > 0,
    };

    let verdict = engine::apply(&config, &mut store, &runner, signals::cancel_flag(), &opts);
    drop(lock);
    verdict
}
