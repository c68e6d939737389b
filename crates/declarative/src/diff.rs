//! Survey - read-only probe pass used to preview a run

use crate::context::{CommandRunner, HostContext};
use crate::planner::ValidatedPlan;
use crate::types::ResourceKind;
use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// What a probe said about a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DiffState {
    /// Already in the desired state
    Satisfied { detail: String },
    /// Would be applied
    Pending { detail: String },
    /// The probe errored
    Unknown { error: String },
}

/// Survey result for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub key: String,
    pub kind: ResourceKind,
    pub description: String,
    pub state: DiffState,
}

/// Probe every resource of a plan without changing anything
///
/// Probes are independent reads, so they run on a pool of `jobs` threads.
/// Results come back in execution order. A probe that errors while one of
/// its dependencies is still pending is reported as pending: it most likely
/// fails only because that dependency has not been applied yet.
pub fn survey(
    plan: &ValidatedPlan,
    runner: &dyn CommandRunner,
    jobs: usize,
) -> Result<Vec<ResourceDiff>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {e}"))?;

    let mut states: Vec<Option<DiffState>> = pool.install(|| {
        (0..plan.len())
            .into_par_iter()
            .map(|idx| {
                let ctx = HostContext::new(runner);
                let state = match plan.resource(idx).probe(&ctx) {
                    Ok(probe) if probe.satisfied => DiffState::Satisfied {
                        detail: probe.detail,
                    },
                    Ok(probe) => DiffState::Pending {
                        detail: probe.detail,
                    },
                    Err(e) => DiffState::Unknown {
                        error: format!("{e:#}"),
                    },
                };
                Some(state)
            })
            .collect()
    });

    let mut pending = vec![false; plan.len()];
    let mut diffs = Vec::with_capacity(plan.len());

    for &idx in plan.order() {
        let resource = plan.resource(idx);
        let mut state = states[idx].take().unwrap_or(DiffState::Unknown {
            error: "not probed".into(),
        });

        if matches!(state, DiffState::Unknown { .. })
            && let Some(&dep) = plan.dependencies(idx).iter().find(|&&d| pending[d])
        {
            state = DiffState::Pending {
                detail: format!("waits on {}", plan.resource(dep).key()),
            };
        }

        pending[idx] = matches!(state, DiffState::Pending { .. });
        diffs.push(ResourceDiff {
            key: resource.key(),
            kind: resource.kind(),
            description: resource.description(),
            state,
        });
    }

    Ok(diffs)
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub satisfied: usize,
    pub pending: usize,
    pub unknown: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.state {
                DiffState::Satisfied { .. } => summary.satisfied += 1,
                DiffState::Pending { .. } => summary.pending += 1,
                DiffState::Unknown { .. } => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.satisfied + self.pending + self.unknown
    }

    /// Whether applying would touch anything (or might)
    pub fn has_changes(&self) -> bool {
        self.pending + self.unknown > 0
    }
}

/// Group diffs by kind, in order of first appearance
pub fn group_by_kind(diffs: &[ResourceDiff]) -> Vec<(ResourceKind, Vec<&ResourceDiff>)> {
    let mut groups: Vec<(ResourceKind, Vec<&ResourceDiff>)> = Vec::new();
    for diff in diffs {
        match groups.iter_mut().find(|(kind, _)| *kind == diff.kind) {
            Some((_, items)) => items.push(diff),
            None => groups.push((diff.kind, vec![diff])),
        }
    }
    groups
}
