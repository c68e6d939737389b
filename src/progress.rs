//! Progress indicators for vpsctl.

use colored::Colorize;
use declarative::{OutcomeStatus, Phase, ProgressCallback, ReconcileOutcome, RunReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for work of unknown length (the survey)
pub fn spinner(msg: &str, quiet: bool) -> ProgressBar {
    if quiet || !console::user_attended() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Marker for a terminal outcome
pub fn status_symbol(status: OutcomeStatus) -> colored::ColoredString {
    match status {
        OutcomeStatus::Applied => "✓".green(),
        OutcomeStatus::Satisfied => "○".dimmed(),
        OutcomeStatus::Failed => "✗".red(),
        OutcomeStatus::Skipped => "⊘".yellow(),
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Pending => "pending",
        Phase::Probing => "probing",
        Phase::Applying => "applying",
        Phase::Verifying => "verifying",
    }
}

/// Reconcile progress: a bar over all resources plus one line per outcome
pub struct RunProgress {
    bar: ProgressBar,
    quiet: bool,
    /// Also list resources that were already satisfied
    verbose: bool,
    current: String,
}

impl RunProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            quiet,
            verbose,
            current: String::new(),
        }
    }

    fn line(&self, msg: &str) {
        if self.quiet {
            return;
        }
        if self.bar.is_hidden() {
            println!("{msg}");
        } else {
            self.bar.println(msg);
        }
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, total: usize) {
        if self.quiet || !console::user_attended() {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = bar;
    }

    fn on_resource_start(&mut self, key: &str, _description: &str) {
        self.current = key.to_string();
        self.bar.set_message(key.to_string());
    }

    fn on_phase(&mut self, key: &str, phase: Phase) {
        log::debug!("{key}: {}", phase_label(phase));
        if key == self.current {
            self.bar.set_message(format!("{key} ({})", phase_label(phase)));
        }
    }

    fn on_resource_complete(&mut self, outcome: &ReconcileOutcome) {
        self.bar.inc(1);
        if outcome.status == OutcomeStatus::Satisfied && !self.verbose {
            return;
        }
        let note = outcome
            .error
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| outcome.skipped.as_ref().map(ToString::to_string))
            .or_else(|| outcome.detail.clone())
            .unwrap_or_default();
        self.line(&format!(
            "  {} {:<40} {}",
            status_symbol(outcome.status),
            outcome.key,
            note.dimmed()
        ));
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
