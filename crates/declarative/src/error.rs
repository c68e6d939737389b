//! Error taxonomy for reconciliation.
//!
//! Three layers:
//! - [`PlanError`]: the declared plan is invalid; raised before any host access.
//! - [`CommandError`] / [`ApplyError`]: typed failures raised by resources
//!   inside their `anyhow` results, recovered by downcasting.
//! - [`ErrorDetail`] / [`SkipReason`]: what ends up on a resource outcome.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The declared resource list cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Same key declared twice with different kind or parameters
    #[error("declaration conflict: `{key}` is declared more than once with different parameters")]
    DeclarationConflict {
        /// The duplicated key
        key: String,
    },

    /// `depends_on` edges form a cycle
    #[error("dependency cycle among: {}", .keys.join(", "))]
    DependencyCycle {
        /// Keys that could not be ordered
        keys: Vec<String>,
    },

    /// A `depends_on` entry names a key nobody declared
    #[error("`{key}` depends on `{missing}`, which is not declared")]
    UnknownDependency {
        /// The dependent resource
        key: String,
        /// The undeclared dependency
        missing: String,
    },
}

/// Failures running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command exceeded the per-command timeout and was killed
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Command line that timed out
        command: String,
        /// The limit that was exceeded
        timeout: Duration,
    },

    /// The command could not be started at all
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        /// Command line that failed to start
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Typed apply failures that deserve their own outcome category.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A unit was started but never reported active within the wait
    #[error("service `{unit}` did not become active")]
    ServiceStartFailed {
        /// systemd unit name
        unit: String,
        /// Captured `systemctl status` / journal output
        diagnostics: String,
    },

    /// The firewall tool is not installed
    #[error("firewall unavailable: {message}")]
    FirewallUnavailable {
        /// Why the firewall cannot be used
        message: String,
    },
}

/// An instance group cannot be expanded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Zero instances requested
    #[error("instance group `{base}`: count must be at least 1")]
    EmptyGroup { base: String },

    /// A derived or explicit port does not fit 1..=65535
    #[error("instance `{key}`: port {port} is outside 1-65535")]
    PortOutOfRange { key: String, port: u32 },

    /// Two instances would listen on the same port
    #[error("instances `{first}` and `{second}` both use port {port}")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    /// An explicit port names an instance the group does not produce
    #[error("instance group `{base}` has no instance `{key}`")]
    UnknownInstance { base: String, key: String },

    /// Secret length or alphabet unusable
    #[error("invalid secret spec: {0}")]
    InvalidSecretSpec(String),
}

/// Why a resource failed, as recorded on its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetail {
    /// Inspecting host state errored (e.g. permission denied)
    #[error("probe failed: {message}")]
    ProbeFailed { message: String },

    /// The applier reported failure
    #[error("apply failed: {message}")]
    ApplyFailed { message: String },

    /// The applier succeeded but the host still disagrees
    #[error("verification mismatch: {detail}")]
    VerificationMismatch { detail: String },

    /// An external command ran past the per-command timeout
    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// A service never reported running after start
    #[error("service `{unit}` failed to start")]
    ServiceStartFailed { unit: String, diagnostics: String },

    /// The firewall tool is missing
    #[error("firewall unavailable: {message}")]
    FirewallUnavailable { message: String },
}

/// Why a resource was never probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency did not reach Satisfied or Applied
    #[error("blocked by `{blocking}`")]
    DependencyFailed { blocking: String },

    /// The run was cancelled before this resource was reached
    #[error("cancelled")]
    Cancelled,

    /// The run halted after an earlier failure
    #[error("halted after `{after}` failed")]
    Halted { after: String },
}

/// Where in the state machine an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Probe,
    Apply,
}

/// Find a typed error anywhere in an anyhow chain.
fn find<T: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> Option<&T> {
    err.downcast_ref::<T>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<T>()))
}

/// Map a resource error onto the outcome taxonomy.
pub(crate) fn classify(err: &anyhow::Error, stage: Stage) -> ErrorDetail {
    if let Some(CommandError::Timeout { command, timeout }) = find::<CommandError>(err) {
        return ErrorDetail::Timeout {
            command: command.clone(),
            seconds: timeout.as_secs(),
        };
    }

    match find::<ApplyError>(err) {
        Some(ApplyError::ServiceStartFailed { unit, diagnostics }) => {
            return ErrorDetail::ServiceStartFailed {
                unit: unit.clone(),
                diagnostics: diagnostics.clone(),
            };
        }
        Some(ApplyError::FirewallUnavailable { message }) => {
            return ErrorDetail::FirewallUnavailable {
                message: message.clone(),
            };
        }
        None => {}
    }

    let message = format!("{err:#}");
    match stage {
        Stage::Probe => ErrorDetail::ProbeFailed { message },
        Stage::Apply => ErrorDetail::ApplyFailed { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_timeout_through_context() {
        let err: anyhow::Result<()> = Err(CommandError::Timeout {
            command: "apt-get install -y nginx".into(),
            timeout: Duration::from_secs(30),
        }
        .into());
        let err = err.context("installing nginx").unwrap_err();

        assert_eq!(
            classify(&err, Stage::Apply),
            ErrorDetail::Timeout {
                command: "apt-get install -y nginx".into(),
                seconds: 30,
            }
        );
    }

    #[test]
    fn classify_service_start_failure() {
        let err = anyhow::Error::new(ApplyError::ServiceStartFailed {
            unit: "nginx".into(),
            diagnostics: "bind() failed".into(),
        });
        assert!(matches!(
            classify(&err, Stage::Apply),
            ErrorDetail::ServiceStartFailed { ref unit, .. } if unit == "nginx"
        ));
    }

    #[test]
    fn classify_untyped_by_stage() {
        let err = anyhow::anyhow!("permission denied");
        assert!(matches!(
            classify(&err, Stage::Probe),
            ErrorDetail::ProbeFailed { .. }
        ));
        assert!(matches!(
            classify(&err, Stage::Apply),
            ErrorDetail::ApplyFailed { .. }
        ));
    }

    #[test]
    fn plan_error_messages() {
        let err = PlanError::DependencyCycle {
            keys: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle among: a, b");
    }
}
