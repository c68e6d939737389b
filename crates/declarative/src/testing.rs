//! In-memory resources for engine tests

use crate::context::{CommandRunner, HostContext};
use crate::error::CommandError;
use crate::resource::Resource;
use crate::types::{ApplyResult, CommandOutput, CommandSpec, ProbeResult, ResourceKind};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runner that refuses every command
pub struct NullRunner;

impl CommandRunner for NullRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        anyhow::bail!("unexpected command in test: {}", spec.display())
    }
}

/// Shared fake host: a set of keys whose state holds, plus a call log
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeHost {
    pub fn set(&self, key: &str) {
        self.state.lock().unwrap().insert(key.to_string());
    }

    pub fn holds(&self, key: &str) -> bool {
        self.state.lock().unwrap().contains(key)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls of the form `<op>:<key>`
    pub fn count(&self, op: &str, key: &str) -> usize {
        let call = format!("{op}:{key}");
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn applies(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("apply:"))
            .count()
    }

    fn record(&self, op: &str, key: &str) {
        self.calls.lock().unwrap().push(format!("{op}:{key}"));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    FailProbe,
    FailApply,
    /// Apply succeeds but the state never holds
    NoEffect,
    TimeoutApply,
}

#[derive(Debug)]
pub struct FakeResource {
    host: FakeHost,
    key: String,
    kind: ResourceKind,
    params: serde_json::Value,
    deps: Vec<String>,
    notifies: Vec<String>,
    behavior: Behavior,
}

impl FakeResource {
    pub fn new(host: &FakeHost, key: &str) -> Self {
        Self {
            host: host.clone(),
            key: key.to_string(),
            kind: ResourceKind::Exec,
            params: serde_json::Value::Null,
            deps: Vec::new(),
            notifies: Vec::new(),
            behavior: Behavior::Normal,
        }
    }

    pub fn kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn depends_on(mut self, key: &str) -> Self {
        self.deps.push(key.to_string());
        self
    }

    pub fn notify(mut self, unit: &str) -> Self {
        self.notifies.push(unit.to_string());
        self
    }

    pub fn behave(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }
}

impl Resource for FakeResource {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn description(&self) -> String {
        format!("Fake {}", self.key)
    }

    fn params(&self) -> serde_json::Value {
        self.params.clone()
    }

    fn depends_on(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn notifies(&self) -> Vec<String> {
        self.notifies.clone()
    }

    fn probe(&self, _ctx: &HostContext) -> Result<ProbeResult> {
        self.host.record("probe", &self.key);
        if self.behavior == Behavior::FailProbe {
            anyhow::bail!("permission denied");
        }
        Ok(if self.host.holds(&self.key) {
            ProbeResult::satisfied("present")
        } else {
            ProbeResult::unsatisfied("absent")
        })
    }

    fn apply(&self, _ctx: &HostContext) -> Result<ApplyResult> {
        self.host.record("apply", &self.key);
        match self.behavior {
            Behavior::FailApply => anyhow::bail!("exit status 100"),
            Behavior::TimeoutApply => Err(CommandError::Timeout {
                command: format!("install {}", self.key),
                timeout: Duration::from_secs(5),
            }
            .into()),
            Behavior::NoEffect => Ok(ApplyResult::modified()),
            Behavior::Normal | Behavior::FailProbe => {
                self.host.set(&self.key);
                Ok(ApplyResult::created())
            }
        }
    }
}
