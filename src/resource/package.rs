//! Package resource - Debian packages via dpkg/apt

use anyhow::Result;
use declarative::{
    ApplyResult, CommandSpec, HostContext, ProbeResult, Resource, ResourceKind,
};

use super::command_failed;

/// One or more packages that must be installed (any version)
#[derive(Debug, Clone)]
pub struct PackageInstalled {
    /// Set name; the package itself for a single package
    pub name: String,
    pub packages: Vec<String>,
}

impl PackageInstalled {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            packages: vec![name.to_string()],
        }
    }

    /// A named set installed in one apt transaction
    pub fn set(name: &str, packages: &[String]) -> Self {
        Self {
            name: name.to_string(),
            packages: packages.to_vec(),
        }
    }

    /// Packages whose dpkg status is not `installed`
    ///
    /// Only the third word of `${Status}` counts: the selection word is
    /// `hold` for pinned packages, which are still installed.
    fn missing(&self, ctx: &HostContext) -> Result<Vec<String>> {
        // Exit status is 1 when any name is unknown to dpkg; the output
        // still lists the ones it knows.
        let output = ctx.runner.execute(
            &CommandSpec::new("dpkg-query")
                .args(["-W", "-f=${Package} ${Status}\\n"])
                .args(self.packages.iter().cloned()),
        )?;

        let stdout = output.stdout_str();
        let installed: Vec<&str> = stdout
            .lines()
            .filter_map(|line| {
                let (pkg, status) = line.split_once(' ')?;
                (status.split_whitespace().nth(2) == Some("installed")).then_some(pkg)
            })
            .collect();

        Ok(self
            .packages
            .iter()
            .filter(|p| {
                let bare = p.split(':').next().unwrap_or(p);
                !installed.contains(&bare)
            })
            .cloned()
            .collect())
    }

    fn install_command(&self) -> CommandSpec {
        CommandSpec::new("apt-get")
            .args(["install", "-y", "-q", "-o", "Dpkg::Options::=--force-confold"])
            .args(self.packages.iter().cloned())
            .env("DEBIAN_FRONTEND", "noninteractive")
    }
}

impl Resource for PackageInstalled {
    fn key(&self) -> String {
        format!("pkg:{}", self.name)
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::PackageInstalled
    }

    fn description(&self) -> String {
        if self.packages.len() == 1 && self.packages[0] == self.name {
            format!("Package {}", self.name)
        } else {
            format!("Packages {} ({})", self.name, self.packages.join(", "))
        }
    }

    fn params(&self) -> serde_json::Value {
        let mut packages = self.packages.clone();
        packages.sort();
        packages.dedup();
        serde_json::json!({ "packages": packages })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        let missing = self.missing(ctx)?;
        if missing.is_empty() {
            Ok(ProbeResult::satisfied("installed"))
        } else {
            Ok(ProbeResult::unsatisfied(format!(
                "not installed: {}",
                missing.join(", ")
            )))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        let first = ctx.runner.execute(&self.install_command())?;
        if first.success {
            return Ok(ApplyResult::created().with_detail("installed"));
        }

        log::info!(
            "apt-get install {} failed, refreshing package index",
            self.packages.join(" ")
        );
        let update = ctx.runner.execute(
            &CommandSpec::new("apt-get")
                .args(["update", "-q"])
                .env("DEBIAN_FRONTEND", "noninteractive"),
        )?;
        if !update.success {
            return Err(command_failed("apt-get update", &update));
        }

        let second = ctx.runner.execute(&self.install_command())?;
        if second.success {
            Ok(ApplyResult::created().with_detail("installed after refreshing the package index"))
        } else {
            Err(command_failed("apt-get install", &second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    #[test]
    fn probe_reports_missing_packages() {
        let host = FakeHost::new();
        host.with(|s| {
            s.installed.insert("curl".into());
        });
        let ctx = HostContext::new(&host);
        let set = PackageInstalled::set("web", &["curl".into(), "nginx".into()]);

        let probe = set.probe(&ctx).unwrap();
        assert!(!probe.satisfied);
        assert_eq!(probe.detail, "not installed: nginx");
        assert!(host.mutations().is_empty());
    }

    #[test]
    fn held_package_counts_as_installed() {
        let host = FakeHost::new();
        host.with(|s| {
            s.installed.insert("nginx".into());
            s.held.insert("nginx".into());
        });
        let ctx = HostContext::new(&host);

        let probe = PackageInstalled::new("nginx").probe(&ctx).unwrap();
        assert!(probe.satisfied, "{}", probe.detail);
    }

    #[test]
    fn half_configured_package_is_missing() {
        let host = FakeHost::new();
        host.with(|s| {
            s.half_configured.insert("nginx".into());
        });
        let ctx = HostContext::new(&host);

        let probe = PackageInstalled::new("nginx").probe(&ctx).unwrap();
        assert_eq!(probe.detail, "not installed: nginx");
    }

    #[test]
    fn installs_then_is_satisfied() {
        let host = FakeHost::new();
        let ctx = HostContext::new(&host);
        let pkg = PackageInstalled::new("nginx");

        let result = pkg.apply(&ctx).unwrap();
        assert_eq!(result.detail.as_deref(), Some("installed"));
        assert!(pkg.probe(&ctx).unwrap().satisfied);
        assert!(!host.commands().iter().any(|c| c.starts_with("apt-get update")));
    }

    #[test]
    fn refreshes_index_once_on_failure() {
        let host = FakeHost::new();
        host.with(|s| {
            s.needs_index.insert("shadowsocks-libev".into());
        });
        let ctx = HostContext::new(&host);
        let pkg = PackageInstalled::new("shadowsocks-libev");

        let result = pkg.apply(&ctx).unwrap();
        assert_eq!(
            result.detail.as_deref(),
            Some("installed after refreshing the package index")
        );
        let installs = host
            .commands()
            .iter()
            .filter(|c| c.starts_with("apt-get install"))
            .count();
        assert_eq!(installs, 2);
    }

    #[test]
    fn gives_up_after_second_attempt() {
        let host = FakeHost::new();
        host.with(|s| {
            s.unknown_packages.insert("nope".into());
        });
        let ctx = HostContext::new(&host);

        let err = PackageInstalled::new("nope").apply(&ctx).unwrap_err();
        assert!(err.to_string().contains("Unable to locate package nope"));
        assert_eq!(host.mutations().len(), 3);
    }

    #[test]
    fn params_ignore_declaration_order() {
        let a = PackageInstalled::set("tools", &["git".into(), "curl".into()]);
        let b = PackageInstalled::set("tools", &["curl".into(), "git".into()]);
        assert_eq!(a.params(), b.params());
        assert_eq!(a.key(), "pkg:tools");
    }
}
