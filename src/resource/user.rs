//! User resource - local accounts and their supplementary groups

use anyhow::Result;
use declarative::{
    ApplyResult, CommandSpec, HostContext, ProbeResult, Resource, ResourceKind, Secret,
};

use super::command_failed;

/// A local user with at least the given supplementary groups
#[derive(Debug, Clone)]
pub struct UserExists {
    pub name: String,
    pub groups: Vec<String>,
    pub shell: String,
    /// Set once, when the account is created
    pub password: Option<Secret>,
}

impl UserExists {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: Vec::new(),
            shell: "/bin/bash".to_string(),
            password: None,
        }
    }

    pub fn with_groups(mut self, groups: &[String]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn with_password(mut self, password: Secret) -> Self {
        self.password = Some(password);
        self
    }

    fn exists(&self, ctx: &HostContext) -> Result<bool> {
        ctx.runner.run_status("getent", &["passwd", &self.name])
    }

    fn missing_groups(&self, ctx: &HostContext) -> Result<Vec<String>> {
        let current = ctx.runner.run_capture("id", &["-nG", &self.name])?;
        let current: Vec<&str> = current.split_whitespace().collect();
        Ok(self
            .groups
            .iter()
            .filter(|g| !current.contains(&g.as_str()))
            .cloned()
            .collect())
    }
}

impl Resource for UserExists {
    fn key(&self) -> String {
        format!("user:{}", self.name)
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::UserExists
    }

    fn description(&self) -> String {
        if self.groups.is_empty() {
            format!("User {}", self.name)
        } else {
            format!("User {} in {}", self.name, self.groups.join(", "))
        }
    }

    fn params(&self) -> serde_json::Value {
        let mut groups = self.groups.clone();
        groups.sort();
        groups.dedup();
        serde_json::json!({
            "name": self.name,
            "groups": groups,
            "shell": self.shell,
            "password": self.password.as_ref().map(Secret::expose),
        })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        if !self.exists(ctx)? {
            return Ok(ProbeResult::unsatisfied("user missing"));
        }
        let missing = self.missing_groups(ctx)?;
        if missing.is_empty() {
            Ok(ProbeResult::satisfied("present"))
        } else {
            Ok(ProbeResult::unsatisfied(format!(
                "not in groups: {}",
                missing.join(", ")
            )))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        if self.exists(ctx)? {
            let missing = self.missing_groups(ctx)?;
            if missing.is_empty() {
                return Ok(ApplyResult::unchanged());
            }
            let list = missing.join(",");
            let output = ctx.runner.run("usermod", &["-aG", &list, &self.name])?;
            if !output.success {
                return Err(command_failed("usermod", &output));
            }
            return Ok(ApplyResult::modified().with_detail(format!("added to {list}")));
        }

        let mut useradd = CommandSpec::new("useradd").args(["-m", "-s", self.shell.as_str()]);
        if !self.groups.is_empty() {
            useradd = useradd.arg("-G").arg(self.groups.join(","));
        }
        let output = ctx.runner.execute(&useradd.arg(self.name.as_str()))?;
        if !output.success {
            return Err(command_failed("useradd", &output));
        }

        if let Some(password) = &self.password {
            let input = format!("{}:{}\n", self.name, password.expose());
            let output = ctx
                .runner
                .execute(&CommandSpec::new("chpasswd").stdin(input))?;
            if !output.success {
                return Err(command_failed("chpasswd", &output));
            }
        }

        Ok(ApplyResult::created())
    }
}
