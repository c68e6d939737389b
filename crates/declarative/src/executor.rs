//! Reconciler - drives probe, apply and verify over a validated plan

use crate::context::{CommandRunner, HostContext, ProgressCallback};
use crate::error::{ErrorDetail, PlanError, SkipReason, Stage, classify};
use crate::planner::{ExecutionPlan, ValidatedPlan};
use crate::resource::Resource;
use crate::types::{Change, OutcomeStatus, Phase, ReconcileOutcome, RunPolicy, RunReport};
use std::sync::atomic::{AtomicBool, Ordering};

/// Validate a plan and reconcile it against the host
///
/// Plan errors are returned before any probe runs. Per-resource failures
/// never escape: they are recorded on the report.
pub fn reconcile<P: ProgressCallback>(
    plan: ExecutionPlan,
    policy: &RunPolicy,
    runner: &dyn CommandRunner,
    cancel: &AtomicBool,
    progress: &mut P,
) -> Result<RunReport, PlanError> {
    let plan = plan.validate()?;
    Ok(execute(&plan, policy, runner, cancel, progress))
}

/// Reconcile an already validated plan
///
/// Resources are handled strictly one at a time in plan order. `cancel` is
/// checked between resources; once set, everything left is skipped.
pub fn execute<P: ProgressCallback>(
    plan: &ValidatedPlan,
    policy: &RunPolicy,
    runner: &dyn CommandRunner,
    cancel: &AtomicBool,
    progress: &mut P,
) -> RunReport {
    let ctx = HostContext::new(runner).with_service_wait(policy.service_wait);

    let mut statuses: Vec<Option<OutcomeStatus>> = vec![None; plan.len()];
    let mut report = RunReport {
        outcomes: Vec::with_capacity(plan.len()),
        ..Default::default()
    };
    let mut halted_after: Option<String> = None;

    progress.on_run_start(plan.len());

    for &idx in plan.order() {
        let resource = plan.resource(idx);
        let key = resource.key();
        progress.on_resource_start(&key, &resource.description());

        if !report.cancelled && cancel.load(Ordering::SeqCst) {
            log::warn!("Cancellation requested; skipping remaining resources");
            report.cancelled = true;
        }

        let blocking = plan
            .dependencies(idx)
            .iter()
            .find(|&&dep| !statuses[dep].is_some_and(|s| s.is_ok()));

        let outcome = if report.cancelled {
            skipped(resource, SkipReason::Cancelled)
        } else if let Some(after) = &halted_after {
            skipped(
                resource,
                SkipReason::Halted {
                    after: after.clone(),
                },
            )
        } else if let Some(&dep) = blocking {
            skipped(
                resource,
                SkipReason::DependencyFailed {
                    blocking: plan.resource(dep).key(),
                },
            )
        } else {
            reconcile_one(resource, &ctx, progress)
        };

        match outcome.status {
            OutcomeStatus::Applied => {
                log::info!("{key}: applied");
                for unit in plan.notifies(idx) {
                    if !report.restarts.contains(unit) {
                        report.restarts.push(unit.clone());
                    }
                }
            }
            OutcomeStatus::Satisfied => log::info!("{key}: satisfied"),
            OutcomeStatus::Failed => {
                if let Some(error) = &outcome.error {
                    log::warn!("{key}: {error}");
                }
                if policy.halt_on_first_failure && halted_after.is_none() {
                    halted_after = Some(key.clone());
                }
            }
            OutcomeStatus::Skipped => {
                if let Some(reason) = &outcome.skipped {
                    log::info!("{key}: skipped ({reason})");
                }
            }
        }

        statuses[idx] = Some(outcome.status);
        progress.on_resource_complete(&outcome);
        report.outcomes.push(outcome);
    }

    progress.on_run_complete(&report);
    report
}

/// Probe, apply if needed, then verify a single resource
fn reconcile_one<P: ProgressCallback>(
    resource: &dyn Resource,
    ctx: &HostContext,
    progress: &mut P,
) -> ReconcileOutcome {
    let key = resource.key();

    progress.on_phase(&key, Phase::Probing);
    log::debug!("{key}: probing");
    let before = match resource.probe(ctx) {
        Ok(probe) => probe,
        Err(e) => return failed(resource, classify(&e, Stage::Probe)),
    };
    if before.satisfied {
        return finished(resource, OutcomeStatus::Satisfied, Some(before.detail));
    }

    progress.on_phase(&key, Phase::Applying);
    log::debug!("{key}: applying ({})", before.detail);
    let applied = match resource.apply(ctx) {
        Ok(result) => result,
        Err(e) => return failed(resource, classify(&e, Stage::Apply)),
    };

    progress.on_phase(&key, Phase::Verifying);
    log::debug!("{key}: verifying");
    match resource.probe(ctx) {
        Ok(after) if after.satisfied => {
            let status = if applied.change == Change::Unchanged {
                OutcomeStatus::Satisfied
            } else {
                OutcomeStatus::Applied
            };
            finished(resource, status, Some(applied.detail.unwrap_or(before.detail)))
        }
        Ok(after) => failed(
            resource,
            ErrorDetail::VerificationMismatch {
                detail: after.detail,
            },
        ),
        Err(e) => failed(resource, classify(&e, Stage::Probe)),
    }
}

fn finished(
    resource: &dyn Resource,
    status: OutcomeStatus,
    detail: Option<String>,
) -> ReconcileOutcome {
    ReconcileOutcome {
        key: resource.key(),
        kind: resource.kind(),
        description: resource.description(),
        status,
        detail,
        error: None,
        skipped: None,
    }
}

fn failed(resource: &dyn Resource, error: ErrorDetail) -> ReconcileOutcome {
    ReconcileOutcome {
        error: Some(error),
        ..finished(resource, OutcomeStatus::Failed, None)
    }
}

fn skipped(resource: &dyn Resource, reason: SkipReason) -> ReconcileOutcome {
    ReconcileOutcome {
        skipped: Some(reason),
        ..finished(resource, OutcomeStatus::Skipped, None)
    }
}
