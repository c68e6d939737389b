//! Apply pipeline: survey, confirm, reconcile, restart, report

use anyhow::Result;
use colored::Colorize;
use declarative::{CommandRunner, DiffSummary, RunPolicy, Verdict, survey};
use std::sync::atomic::AtomicBool;

use super::differ::display_diff;
use super::report::{self, Restart};
use super::{Prepared, prepare};
use crate::progress::{self, RunProgress};
use crate::resource::command_failed;
use crate::schema::HostConfig;
use crate::state::SecretsStore;

/// Options for `vpsctl apply`
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub target: Option<String>,
    pub policy: RunPolicy,
    /// Concurrent probes in the preview survey
    pub jobs: usize,
    /// Skip the confirmation prompt
    pub yes: bool,
    pub show_secrets: bool,
    pub quiet: bool,
    pub verbose: bool,
}

/// Bring the host to the state `config` describes
pub fn apply(
    config: &HostConfig,
    store: &mut SecretsStore,
    runner: &dyn CommandRunner,
    cancel: &AtomicBool,
    opts: &ApplyOptions,
) -> Result<Verdict> {
    let Prepared {
        plan,
        endpoints,
        generated,
    } = prepare(config, store, opts.target.as_deref())?;

    let pb = progress::spinner(&format!("Probing {} resources...", plan.len()), opts.quiet);
    let diffs = survey(&plan, runner, opts.jobs);
    pb.finish_and_clear();
    let diffs = diffs?;

    if !opts.quiet {
        display_diff(&diffs, false);
    }

    if !DiffSummary::from_diffs(&diffs).has_changes() {
        if !opts.quiet {
            report::print_endpoints(&endpoints, opts.show_secrets);
        }
        return Ok(Verdict::Unchanged);
    }

    if !opts.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(Verdict::Unchanged);
    }

    // Persist before anything reaches the host, so a crash mid-run can't
    // leave configs on disk whose passwords exist nowhere else.
    let recorded = store.record(&generated);
    if recorded > 0 {
        log::info!("Recorded {recorded} new secrets");
    }
    store.save_if_dirty()?;

    let mut progress = RunProgress::new(opts.quiet, opts.verbose);
    let report = declarative::execute(&plan, &opts.policy, runner, cancel, &mut progress);

    let restarts = if report.cancelled {
        if !report.restarts.is_empty() {
            log::warn!(
                "Run cancelled; not restarting {}",
                report.restarts.join(", ")
            );
        }
        Vec::new()
    } else {
        restart_units(runner, &report.restarts)
    };

    let verdict = report::final_verdict(&report, &restarts);
    if !opts.quiet {
        report::print_problems(&report);
        report::print_restarts(&restarts);
        report::print_endpoints(&endpoints, opts.show_secrets);
        report::print_summary(&report, verdict);
    }
    Ok(verdict)
}

/// Restart each unit once, in order; failures are collected, not fatal
pub fn restart_units(runner: &dyn CommandRunner, units: &[String]) -> Vec<Restart> {
    units
        .iter()
        .map(|unit| {
            let error = match runner.run("systemctl", &["restart", unit]) {
                Ok(output) if output.success => None,
                Ok(output) => Some(command_failed("systemctl restart", &output).to_string()),
                Err(e) => Some(format!("{e:#}")),
            };
            match &error {
                None => log::info!("Restarted {unit}"),
                Some(e) => log::warn!("Failed to restart {unit}: {e}"),
            }
            Restart {
                unit: unit.clone(),
                error,
            }
        })
        .collect()
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    anyhow::ensure!(
        console::user_attended(),
        "Not attached to a terminal; pass --yes to apply without confirmation"
    );

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
