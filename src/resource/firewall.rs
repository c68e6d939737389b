//! Firewall resource - ufw allow rules

use anyhow::Result;
use declarative::{ApplyError, ApplyResult, HostContext, ProbeResult, Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::command_failed;

/// Transport protocol of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    #[default]
    Tcp,
    Udp,
    /// Both tcp and udp in one ufw rule
    Any,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Any => "any",
        })
    }
}

/// An inbound allow rule
#[derive(Debug, Clone)]
pub struct FirewallRuleAllow {
    pub port: u16,
    pub proto: Proto,
}

impl FirewallRuleAllow {
    pub fn new(port: u16, proto: Proto) -> Self {
        Self { port, proto }
    }

    /// Rule spec as ufw spells it: `22/tcp`, or `22` for both protocols
    pub fn spec(&self) -> String {
        match self.proto {
            Proto::Any => self.port.to_string(),
            proto => format!("{}/{proto}", self.port),
        }
    }
}

/// Whether `ufw show added` output already contains an allow rule for `spec`
fn has_rule(listing: &str, spec: &str) -> bool {
    listing.lines().any(|line| {
        let mut words = line.split_whitespace();
        words.next() == Some("ufw")
            && words.next() == Some("allow")
            && words.next() == Some(spec)
            && words.next().is_none_or(|w| w == "comment")
    })
}

impl Resource for FirewallRuleAllow {
    fn key(&self) -> String {
        format!("ufw:{}/{}", self.port, self.proto)
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::FirewallRuleAllow
    }

    fn description(&self) -> String {
        format!("Allow {} through ufw", self.spec())
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "port": self.port, "proto": self.proto })
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        if !ctx.runner.command_exists("ufw") {
            return Ok(ProbeResult::unsatisfied("ufw not installed"));
        }
        let listing = ctx.runner.run_capture("ufw", &["show", "added"])?;
        if has_rule(&listing, &self.spec()) {
            Ok(ProbeResult::satisfied("rule present"))
        } else {
            Ok(ProbeResult::unsatisfied("rule missing"))
        }
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        if !ctx.runner.command_exists("ufw") {
            return Err(ApplyError::FirewallUnavailable {
                message: "ufw is not installed".into(),
            }
            .into());
        }

        let spec = self.spec();
        let output = ctx.runner.run("ufw", &["allow", &spec])?;
        if !output.success {
            return Err(command_failed(&format!("ufw allow {spec}"), &output));
        }
        if output.stdout_str().contains("Skipping") {
            return Ok(ApplyResult::unchanged().with_detail("rule already existed"));
        }
        Ok(ApplyResult::created())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    #[test]
    fn spec_formats() {
        assert_eq!(FirewallRuleAllow::new(22, Proto::Tcp).spec(), "22/tcp");
        assert_eq!(FirewallRuleAllow::new(8388, Proto::Any).spec(), "8388");
        assert_eq!(FirewallRuleAllow::new(53, Proto::Udp).key(), "ufw:53/udp");
    }

    #[test]
    fn rule_listing_is_parsed_exactly() {
        let listing = "Added user rules (see 'ufw status' for running firewall):\n\
                       ufw allow 22/tcp\n\
                       ufw allow 8388 comment 'ss1'\n";
        assert!(has_rule(listing, "22/tcp"));
        assert!(has_rule(listing, "8388"));
        assert!(!has_rule(listing, "22"));
        assert!(!has_rule(listing, "8388/tcp"));
    }

    #[test]
    fn adds_rule_once() {
        let host = FakeHost::new();
        let ctx = HostContext::new(&host);
        let rule = FirewallRuleAllow::new(443, Proto::Tcp);

        assert_eq!(rule.probe(&ctx).unwrap().detail, "rule missing");
        rule.apply(&ctx).unwrap();
        assert!(rule.probe(&ctx).unwrap().satisfied);

        let again = rule.apply(&ctx).unwrap();
        assert_eq!(again.change, declarative::Change::Unchanged);
        assert_eq!(host.with(|s| s.ufw_rules.len()), 1);
    }

    #[test]
    fn missing_ufw_is_unavailable() {
        let host = FakeHost::new();
        host.with(|s| s.ufw_installed = false);
        let ctx = HostContext::new(&host);
        let rule = FirewallRuleAllow::new(22, Proto::Tcp);

        assert_eq!(rule.probe(&ctx).unwrap().detail, "ufw not installed");
        let err = rule.apply(&ctx).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApplyError>(),
            Some(ApplyError::FirewallUnavailable { .. })
        ));
    }
}
