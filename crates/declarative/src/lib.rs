//! # Declarative
//!
//! A framework for declarative, idempotent host reconciliation.
//!
//! Callers describe the desired state of a host as a list of resources.
//! The reconciler validates that list, orders it by dependencies and then,
//! one resource at a time, probes live state, applies a minimal change when
//! needed and probes again to verify.
//!
//! ## Core Concepts
//!
//! - **Resource**: one unit of desired host state with a read-only `probe`
//!   and a converging `apply`
//! - **ExecutionPlan**: the declared resources, validated into a
//!   [`ValidatedPlan`] (unique keys, known dependencies, no cycles)
//! - **Reconciler**: [`reconcile`] / [`execute`] drive probe, apply, verify
//!   and record one [`ReconcileOutcome`] per resource
//! - **Survey**: [`survey`] probes a plan concurrently without changing it
//! - **InstanceGroup**: [`expand`] turns "N instances" into N resource sets
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ExecutionPlan, NoProgress, RunPolicy, reconcile};
//! use std::sync::atomic::AtomicBool;
//!
//! let mut plan = ExecutionPlan::new();
//! plan.add(my_package_resource);
//! plan.add(my_service_resource.after("pkg:nginx"));
//!
//! let cancel = AtomicBool::new(false);
//! let report = reconcile(plan, &RunPolicy::default(), &runner, &cancel, &mut NoProgress)?;
//! println!("{:?}", report.verdict());
//! ```
//!
//! ## Provider Traits
//!
//! - [`CommandRunner`]: runs external commands (and owns their timeout)
//! - [`ProgressCallback`]: receives phase transitions and outcomes
//!
//! This keeps the crate free of any specific process runner or UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod planner;
pub mod resource;
pub mod secret;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use context::{CommandRunner, HostContext, NoProgress, ProgressCallback};
pub use diff::{DiffState, DiffSummary, ResourceDiff, group_by_kind, survey};
pub use error::{ApplyError, CommandError, ErrorDetail, PlanError, SkipReason, TemplateError};
pub use executor::{execute, reconcile};
pub use planner::{ExecutionPlan, ValidatedPlan};
pub use resource::{BoxedResource, Declared, Resource, ResourceExt};
pub use secret::{Secret, SecretSpec};
pub use template::{Expansion, Instance, InstanceGroup, expand};
pub use types::{
    ApplyResult, Change, CommandOutput, CommandSpec, OutcomeStatus, Phase, ProbeResult,
    ReconcileOutcome, ResourceKind, RunPolicy, RunReport, RunSummary, Verdict,
};
