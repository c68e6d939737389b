//! Guarded command resource
//!
//! For state no other resource models: a `check` command decides whether
//! the state holds and `run` (then `fallback`, once) establishes it.

use anyhow::{Context, Result};
use declarative::{ApplyResult, CommandSpec, HostContext, ProbeResult, Resource, ResourceKind};

use super::command_failed;

#[derive(Debug, Clone)]
pub struct Exec {
    pub key: String,
    pub description: String,
    pub check: Vec<String>,
    pub run: Vec<String>,
    pub fallback: Option<Vec<String>>,
}

impl Exec {
    pub fn new(key: &str, check: Vec<String>, run: Vec<String>) -> Result<Self> {
        anyhow::ensure!(!check.is_empty(), "exec `{key}`: check command is empty");
        anyhow::ensure!(!run.is_empty(), "exec `{key}`: run command is empty");
        Ok(Self {
            key: key.to_string(),
            description: format!("Run {}", run.join(" ")),
            check,
            run,
            fallback: None,
        })
    }

    /// Shorthand for `sh -c <check>` / `sh -c <run>`
    pub fn shell(key: &str, check: &str, run: &str) -> Self {
        Self {
            key: key.to_string(),
            description: format!("Run {run}"),
            check: sh(check),
            run: sh(run),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Vec<String>) -> Self {
        if !fallback.is_empty() {
            self.fallback = Some(fallback);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

fn spec(argv: &[String]) -> Result<CommandSpec> {
    CommandSpec::from_argv(argv).context("empty command")
}

impl Resource for Exec {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Exec
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "check": self.check,
            "run": self.run,
            "fallback": self.fallback,
        })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        let output = ctx.runner.execute(&spec(&self.check)?)?;
        if output.success {
            Ok(ProbeResult::satisfied("check passed"))
        } else {
            Ok(ProbeResult::unsatisfied("check failed"))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        let primary = ctx.runner.execute(&spec(&self.run)?)?;
        if primary.success {
            return Ok(ApplyResult::modified().with_detail("primary command succeeded"));
        }

        let Some(fallback) = &self.fallback else {
            return Err(command_failed(&self.run.join(" "), &primary));
        };

        log::info!(
            "{}: primary command failed, trying fallback: {}",
            self.key,
            primary.combined()
        );
        let second = ctx.runner.execute(&spec(fallback)?)?;
        if second.success {
            Ok(ApplyResult::modified().with_detail("fallback command succeeded"))
        } else {
            Err(command_failed(&fallback.join(" "), &second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn check_gates_run() {
        let host = FakeHost::new();
        let ctx = HostContext::new(&host);
        let exec = Exec::new("marker", argv("flag-check m"), argv("flag-set m")).unwrap();

        assert!(!exec.probe(&ctx).unwrap().satisfied);
        exec.apply(&ctx).unwrap();
        assert!(exec.probe(&ctx).unwrap().satisfied);
    }

    #[test]
    fn fallback_runs_once_after_primary_fails() {
        let host = FakeHost::new();
        let ctx = HostContext::new(&host);
        let exec = Exec::new("tailscale", argv("flag-check up"), argv("false authkey"))
            .unwrap()
            .with_fallback(argv("flag-set up"));

        let result = exec.apply(&ctx).unwrap();
        assert_eq!(result.detail.as_deref(), Some("fallback command succeeded"));
        assert_eq!(
            host.commands(),
            vec!["false authkey".to_string(), "flag-set up".to_string()]
        );
    }

    #[test]
    fn failure_without_fallback_is_an_error() {
        let host = FakeHost::new();
        let ctx = HostContext::new(&host);
        let exec = Exec::new("broken", argv("flag-check x"), argv("false")).unwrap();
        assert!(exec.apply(&ctx).is_err());
    }

    #[test]
    fn empty_commands_are_rejected() {
        assert!(Exec::new("x", Vec::new(), argv("true")).is_err());
        assert!(Exec::new("x", argv("true"), Vec::new()).is_err());
    }
}
