//! Post-run report

use colored::Colorize;
use declarative::{ErrorDetail, OutcomeStatus, RunReport, Secret, Verdict};

use super::planner::Endpoint;
use crate::progress::status_symbol;

const DIAGNOSTIC_LINES: usize = 12;

/// Result of restarting one notified unit
#[derive(Debug)]
pub struct Restart {
    pub unit: String,
    pub error: Option<String>,
}

/// Redacted unless the operator asked to see it
pub fn reveal(secret: &Secret, show: bool) -> String {
    if show {
        secret.expose().to_string()
    } else {
        secret.to_string()
    }
}

/// Failures and skips with their causes
pub fn print_problems(report: &RunReport) {
    let problems: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| !o.status.is_ok())
        .collect();
    if problems.is_empty() {
        return;
    }

    println!();
    println!("{}", "Needs attention".yellow().bold());
    for outcome in problems {
        let cause = match (&outcome.error, &outcome.skipped) {
            (Some(error), _) => error.to_string(),
            (None, Some(reason)) => reason.to_string(),
            (None, None) => String::new(),
        };
        println!(
            "  {} {} {}",
            status_symbol(outcome.status),
            outcome.key.bold(),
            cause
        );

        if let Some(ErrorDetail::ServiceStartFailed { diagnostics, .. }) = &outcome.error {
            for line in diagnostics.lines().take(DIAGNOSTIC_LINES) {
                println!("      {}", line.dimmed());
            }
        }
    }
}

pub fn print_restarts(restarts: &[Restart]) {
    if restarts.is_empty() {
        return;
    }
    println!();
    println!("{}", "Restarted units".bold());
    for restart in restarts {
        match &restart.error {
            None => println!("  {} {}", "✓".green(), restart.unit),
            Some(error) => println!("  {} {} {}", "✗".red(), restart.unit, error.dimmed()),
        }
    }
}

pub fn print_endpoints(endpoints: &[Endpoint], show_secrets: bool) {
    if endpoints.is_empty() {
        return;
    }
    println!();
    println!("{}", "Shadowsocks".bold());
    for endpoint in endpoints {
        println!(
            "  {:<8} port {:<6} {:<24} {}",
            endpoint.key,
            endpoint.port,
            endpoint.method.dimmed(),
            reveal(&endpoint.password, show_secrets)
        );
    }
    if !show_secrets {
        println!("  {}", "Run with --show-secrets to print passwords".dimmed());
    }
}

/// Final counts and verdict line
pub fn print_summary(report: &RunReport, verdict: Verdict) {
    let summary = report.summary();
    println!();
    match verdict {
        Verdict::Unchanged => println!("  {} Host already in the desired state", "✓".green().bold()),
        Verdict::Changed => println!("  {} Host converged", "✓".green().bold()),
        Verdict::NeedsAttention if report.cancelled => {
            println!("  {} Run interrupted", "⚠".yellow().bold());
        }
        Verdict::NeedsAttention => println!("  {} Host needs attention", "⚠".yellow().bold()),
    }

    for (count, label, status) in [
        (summary.applied, "applied", OutcomeStatus::Applied),
        (summary.satisfied, "already satisfied", OutcomeStatus::Satisfied),
        (summary.failed, "failed", OutcomeStatus::Failed),
        (summary.skipped, "skipped", OutcomeStatus::Skipped),
    ] {
        if count > 0 {
            println!("    {} {count} {label}", status_symbol(status));
        }
    }
}

/// Verdict after restarts: a unit that wouldn't restart needs attention too
pub fn final_verdict(report: &RunReport, restarts: &[Restart]) -> Verdict {
    if restarts.iter().any(|r| r.error.is_some()) {
        Verdict::NeedsAttention
    } else {
        report.verdict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ReconcileOutcome, ResourceKind};

    fn report(status: OutcomeStatus) -> RunReport {
        RunReport {
            outcomes: vec![ReconcileOutcome {
                key: "pkg:curl".into(),
                kind: ResourceKind::PackageInstalled,
                description: "Install curl".into(),
                status,
                detail: None,
                error: None,
                skipped: None,
            }],
            restarts: Vec::new(),
            cancelled: false,
        }
    }

    #[test]
    fn secrets_are_redacted_by_default() {
        let secret = Secret::new("p4ssw0rd");
        assert_eq!(reveal(&secret, false), "<redacted>");
        assert_eq!(reveal(&secret, true), "p4ssw0rd");
    }

    #[test]
    fn failed_restart_needs_attention() {
        let report = report(OutcomeStatus::Applied);
        assert_eq!(final_verdict(&report, &[]), Verdict::Changed);

        let restarts = vec![Restart {
            unit: "ssh".into(),
            error: Some("exit 1".into()),
        }];
        assert_eq!(final_verdict(&report, &restarts), Verdict::NeedsAttention);
    }

    #[test]
    fn satisfied_run_is_unchanged() {
        assert_eq!(
            final_verdict(&report(OutcomeStatus::Satisfied), &[]),
            Verdict::Unchanged
        );
    }
}
