//! Execution engine for vpsctl
//!
//! The engine orchestrates:
//! 1. Planning - Compile the host description into resources
//! 2. Diffing - Survey live host state against it
//! 3. Executing - Reconcile, restart notified units, report

pub mod differ;
pub mod executor;
pub mod planner;
pub mod report;

use anyhow::Result;
use declarative::{Secret, ValidatedPlan};

use crate::schema::HostConfig;
use crate::state::SecretsStore;
use planner::Endpoint;

pub use executor::{ApplyOptions, apply};

/// A validated plan ready to survey or reconcile
pub struct Prepared {
    pub plan: ValidatedPlan,
    pub endpoints: Vec<Endpoint>,
    pub generated: Vec<(String, Secret)>,
}

/// Compile, filter to `target`, and validate
pub fn prepare(
    config: &HostConfig,
    store: &SecretsStore,
    target: Option<&str>,
) -> Result<Prepared> {
    let compiled = planner::compile(config, store)?;
    let declared = compiled.plan.total_resources();

    let filtered = compiled.plan.filter_by_target(target);
    if let Some(target) = target {
        anyhow::ensure!(
            !filtered.is_empty(),
            "No resources match target `{target}`"
        );
        log::debug!(
            "Target `{target}` selects {} of {declared} resources",
            filtered.total_resources()
        );
    }

    let plan = filtered.validate()?;
    Ok(Prepared {
        plan,
        endpoints: compiled.endpoints,
        generated: compiled.generated,
    })
}
