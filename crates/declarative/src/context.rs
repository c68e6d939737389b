//! Host context and provider traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific process runner, UI or host.

use crate::types::{CommandOutput, CommandSpec, Phase, ReconcileOutcome, RunReport};
use anyhow::Result;
use std::time::Duration;

/// Provider for external command execution
///
/// Implementations own the per-command timeout and must report an expired
/// timeout as [`CommandError::Timeout`](crate::CommandError::Timeout).
pub trait CommandRunner: Send + Sync {
    /// Run a command, returning its output whatever the exit status
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run `cmd args...`
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        self.execute(&CommandSpec::new(cmd).args(args.iter().copied()))
    }

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command and capture stdout, failing on non-zero exit
    fn run_capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            anyhow::bail!(
                "`{} {}` failed: {}",
                cmd,
                args.join(" "),
                output.stderr_str().trim()
            );
        }
        Ok(output.stdout_str())
    }

    /// Check whether a program is available on PATH
    fn command_exists(&self, cmd: &str) -> bool {
        self.run("sh", &["-c", &format!("command -v {cmd}")])
            .map(|o| o.success)
            .unwrap_or(false)
    }
}

/// Context passed to probe and apply operations
pub struct HostContext<'a> {
    /// Runner for every external command
    pub runner: &'a dyn CommandRunner,
    /// Bounded wait for services to report active
    pub service_wait: Duration,
}

impl<'a> HostContext<'a> {
    /// Create a new host context
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            service_wait: Duration::from_secs(10),
        }
    }

    pub fn with_service_wait(mut self, wait: Duration) -> Self {
        self.service_wait = wait;
        self
    }
}

/// Progress callback for reconcile runs
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback {
    /// Called once the plan is validated, before any probe
    fn on_run_start(&mut self, total: usize);

    /// Called when a resource leaves Pending
    fn on_resource_start(&mut self, key: &str, description: &str);

    /// Called on every state-machine transition of a resource
    fn on_phase(&mut self, key: &str, phase: Phase);

    /// Called when a resource reaches its terminal outcome
    fn on_resource_complete(&mut self, outcome: &ReconcileOutcome);

    /// Called after the last resource
    fn on_run_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _key: &str, _description: &str) {}
    fn on_phase(&mut self, _key: &str, _phase: Phase) {}
    fn on_resource_complete(&mut self, _outcome: &ReconcileOutcome) {}
    fn on_run_complete(&mut self, _report: &RunReport) {}
}
