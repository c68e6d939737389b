//! Service resources - systemd units enabled at boot and running now

use anyhow::Result;
use declarative::{ApplyError, ApplyResult, HostContext, ProbeResult, Resource, ResourceKind};
use std::thread;
use std::time::{Duration, Instant};

use super::command_failed;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `is-enabled` states that need no `systemctl enable`: the unit has no
/// [Install] section of its own or is pulled in under another name.
const SATISFIED_STATES: &[&str] = &["enabled", "static", "alias", "generated"];

/// A unit that must be enabled
#[derive(Debug, Clone)]
pub struct ServiceEnabled {
    pub unit: String,
}

/// A unit that must be active
#[derive(Debug, Clone)]
pub struct ServiceRunning {
    pub unit: String,
}

impl ServiceEnabled {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }
}

impl ServiceRunning {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }

    /// Status and recent journal lines, for failure reports
    fn diagnostics(&self, ctx: &HostContext) -> String {
        let status = ctx
            .runner
            .run("systemctl", &["status", &self.unit, "--no-pager", "--lines=0"])
            .map(|o| o.combined())
            .unwrap_or_default();
        let journal = ctx
            .runner
            .run("journalctl", &["-u", &self.unit, "-n", "20", "--no-pager"])
            .map(|o| o.combined())
            .unwrap_or_default();
        [status, journal]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `systemctl <query> <unit>` output, trimmed ("enabled", "inactive", ...)
fn query(ctx: &HostContext, query: &str, unit: &str) -> Result<String> {
    let output = ctx.runner.run("systemctl", &[query, unit])?;
    Ok(output.stdout_str().trim().to_string())
}

impl Resource for ServiceEnabled {
    fn key(&self) -> String {
        format!("enabled:{}", self.unit)
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceEnabled
    }

    fn description(&self) -> String {
        format!("Enable {}", self.unit)
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "unit": self.unit })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        let state = query(ctx, "is-enabled", &self.unit)?;
        if SATISFIED_STATES.contains(&state.as_str()) {
            Ok(ProbeResult::satisfied(state))
        } else if state.is_empty() {
            Ok(ProbeResult::unsatisfied("unknown unit"))
        } else {
            Ok(ProbeResult::unsatisfied(state))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        if query(ctx, "is-enabled", &self.unit)?.starts_with("masked") {
            anyhow::bail!(
                "{} is masked; run `systemctl unmask {}` if it should be enabled",
                self.unit,
                self.unit
            );
        }
        let output = ctx.runner.run("systemctl", &["enable", &self.unit])?;
        if !output.success {
            return Err(command_failed(&format!("systemctl enable {}", self.unit), &output));
        }
        Ok(ApplyResult::modified())
    }
}

impl Resource for ServiceRunning {
    fn key(&self) -> String {
        format!("running:{}", self.unit)
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceRunning
    }

    fn description(&self) -> String {
        format!("Start {}", self.unit)
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "unit": self.unit })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        let state = query(ctx, "is-active", &self.unit)?;
        if state == "active" {
            Ok(ProbeResult::satisfied("active"))
        } else {
            Ok(ProbeResult::unsatisfied(if state.is_empty() {
                "inactive".to_string()
            } else {
                state
            }))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        let output = ctx.runner.run("systemctl", &["start", &self.unit])?;
        if !output.success {
            let mut diagnostics = output.combined();
            let more = self.diagnostics(ctx);
            if !more.is_empty() {
                diagnostics = format!("{diagnostics}\n{more}");
            }
            return Err(ApplyError::ServiceStartFailed {
                unit: self.unit.clone(),
                diagnostics,
            }
            .into());
        }

        let deadline = Instant::now() + ctx.service_wait;
        loop {
            if query(ctx, "is-active", &self.unit)? == "active" {
                return Ok(ApplyResult::modified());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL.min(ctx.service_wait));
        }

        Err(ApplyError::ServiceStartFailed {
            unit: self.unit.clone(),
            diagnostics: self.diagnostics(ctx),
        }
        .into())
    }
}
