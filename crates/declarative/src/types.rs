//! Core types for declarative resource reconciliation

use crate::error::{ErrorDetail, SkipReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of host state a resource manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    PackageInstalled,
    LinePresentInFile,
    FileContentExact,
    ServiceEnabled,
    ServiceRunning,
    FirewallRuleAllow,
    UserExists,
    /// Guarded command: satisfied when a check command succeeds
    Exec,
}

impl ResourceKind {
    /// Short name used for grouping, filtering and display
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackageInstalled => "package",
            Self::LinePresentInFile => "line",
            Self::FileContentExact => "file",
            Self::ServiceEnabled => "service_enabled",
            Self::ServiceRunning => "service_running",
            Self::FirewallRuleAllow => "firewall",
            Self::UserExists => "user",
            Self::Exec => "exec",
        }
    }

    /// Human-readable group label
    pub fn label(&self) -> &'static str {
        match self {
            Self::PackageInstalled => "Packages",
            Self::LinePresentInFile => "Config lines",
            Self::FileContentExact => "Files",
            Self::ServiceEnabled => "Services (enabled)",
            Self::ServiceRunning => "Services (running)",
            Self::FirewallRuleAllow => "Firewall rules",
            Self::UserExists => "Users",
            Self::Exec => "Commands",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting live host state for one resource
///
/// Produced fresh on every probe; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub satisfied: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn satisfied(detail: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            detail: detail.into(),
        }
    }

    pub fn unsatisfied(detail: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            detail: detail.into(),
        }
    }
}

/// What an applier did to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Something new was created (package, file, user, rule)
    Created,
    /// Existing state was changed in place
    Modified,
    /// The applier found nothing to do (lost a race with another writer)
    Unchanged,
}

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub change: Change,
    /// Which path the applier took, when it had more than one
    pub detail: Option<String>,
}

impl ApplyResult {
    pub fn created() -> Self {
        Self {
            change: Change::Created,
            detail: None,
        }
    }

    pub fn modified() -> Self {
        Self {
            change: Change::Modified,
            detail: None,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            change: Change::Unchanged,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Lifecycle phase of a single resource during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Probing,
    Applying,
    Verifying,
}

/// Terminal status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// Desired state already held; nothing was touched
    Satisfied,
    /// Host was changed and the change verified
    Applied,
    /// Probe, apply or verification failed
    Failed,
    /// Never probed (dependency failure, halt or cancellation)
    Skipped,
}

impl OutcomeStatus {
    /// Whether dependents may proceed
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Satisfied | Self::Applied)
    }
}

/// Per-resource terminal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub key: String,
    pub kind: ResourceKind,
    pub description: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

/// Run policy supplied by the caller
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Stop after the first failed resource; the rest are skipped
    pub halt_on_first_failure: bool,
    /// Upper bound for any single external command
    pub command_timeout: Duration,
    /// How long ServiceRunning waits for a unit to report active
    pub service_wait: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            halt_on_first_failure: false,
            command_timeout: Duration::from_secs(600),
            service_wait: Duration::from_secs(10),
        }
    }
}

/// What a run means to an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Everything was already satisfied
    Unchanged,
    /// The host was changed and nothing needs attention
    Changed,
    /// At least one resource failed or was skipped
    NeedsAttention,
}

/// Outcome counts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub satisfied: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[ReconcileOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.add(outcome.status);
        }
        summary
    }

    pub fn add(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Satisfied => self.satisfied += 1,
            OutcomeStatus::Applied => self.applied += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.satisfied + self.applied + self.failed + self.skipped
    }

    pub fn verdict(&self) -> Verdict {
        if self.failed > 0 || self.skipped > 0 {
            Verdict::NeedsAttention
        } else if self.applied > 0 {
            Verdict::Changed
        } else {
            Verdict::Unchanged
        }
    }
}

/// Everything a reconcile run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// One outcome per resource, in execution order
    pub outcomes: Vec<ReconcileOutcome>,
    /// Units to restart because a resource notifying them was applied
    pub restarts: Vec<String>,
    /// Whether the run stopped early on a cancellation request
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_outcomes(&self.outcomes)
    }

    pub fn verdict(&self) -> Verdict {
        self.summary().verdict()
    }

    pub fn outcome(&self, key: &str) -> Option<&ReconcileOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }
}

/// An external command to run on the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Bytes written to the child's stdin (e.g. `chpasswd` input)
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Build from an argv vector; `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for logs and error messages (stdin is never shown)
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Both streams, trimmed, for diagnostics
    pub fn combined(&self) -> String {
        let stdout = self.stdout_str();
        let stderr = self.stderr_str();
        match (stdout.trim(), stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: OutcomeStatus) -> ReconcileOutcome {
        ReconcileOutcome {
            key: "k".into(),
            kind: ResourceKind::Exec,
            description: String::new(),
            status,
            detail: None,
            error: None,
            skipped: None,
        }
    }

    #[test]
    fn verdict_unchanged_when_all_satisfied() {
        let summary = RunSummary::from_outcomes(&[
            outcome(OutcomeStatus::Satisfied),
            outcome(OutcomeStatus::Satisfied),
        ]);
        assert_eq!(summary.verdict(), Verdict::Unchanged);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn verdict_changed_when_applied() {
        let summary = RunSummary::from_outcomes(&[
            outcome(OutcomeStatus::Satisfied),
            outcome(OutcomeStatus::Applied),
        ]);
        assert_eq!(summary.verdict(), Verdict::Changed);
    }

    #[test]
    fn verdict_needs_attention_wins() {
        let summary = RunSummary::from_outcomes(&[
            outcome(OutcomeStatus::Applied),
            outcome(OutcomeStatus::Skipped),
        ]);
        assert_eq!(summary.verdict(), Verdict::NeedsAttention);
    }

    #[test]
    fn command_spec_from_argv() {
        let argv = vec!["ufw".to_string(), "allow".to_string(), "22/tcp".to_string()];
        let spec = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(spec.program, "ufw");
        assert_eq!(spec.display(), "ufw allow 22/tcp");
        assert!(CommandSpec::from_argv(&[]).is_none());
    }

    #[test]
    fn combined_output_joins_streams() {
        let output = CommandOutput {
            stdout: b"out\n".to_vec(),
            stderr: b"err\n".to_vec(),
            success: false,
        };
        assert_eq!(output.combined(), "out\nerr");
        assert_eq!(CommandOutput::failed("boom").combined(), "boom");
    }
}
