//! Resource trait for declarative state management
//!
//! A Resource describes one unit of desired host state. It can inspect
//! whether that state already holds (probe) and perform the minimal
//! mutation to reach it (apply).

use crate::context::HostContext;
use crate::types::{ApplyResult, ProbeResult, ResourceKind};
use anyhow::Result;
use std::fmt;

/// Core trait for declarative resources
///
/// Every resource provides:
/// - Identity (key, kind, description)
/// - Parameters for conflict detection
/// - Ordering edges (depends_on)
/// - State detection (probe) and convergence (apply)
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyResult, HostContext, ProbeResult, Resource, ResourceKind};
///
/// #[derive(Debug)]
/// struct Marker { path: String }
///
/// impl Resource for Marker {
///     fn key(&self) -> String { format!("file:{}", self.path) }
///     fn kind(&self) -> ResourceKind { ResourceKind::FileContentExact }
///     fn description(&self) -> String { format!("Marker file {}", self.path) }
///     fn params(&self) -> serde_json::Value { serde_json::json!({ "path": self.path }) }
///
///     fn probe(&self, _ctx: &HostContext) -> anyhow::Result<ProbeResult> {
///         Ok(if std::path::Path::new(&self.path).exists() {
///             ProbeResult::satisfied("present")
///         } else {
///             ProbeResult::unsatisfied("missing")
///         })
///     }
///
///     fn apply(&self, _ctx: &HostContext) -> anyhow::Result<ApplyResult> {
///         std::fs::write(&self.path, "")?;
///         Ok(ApplyResult::created())
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Unique identifier within one run
    ///
    /// Examples: "pkg:nginx", "file:/etc/sysctl.d/99-vpsctl.conf", "ufw:22/tcp", "ss1"
    fn key(&self) -> String;

    /// Kind of host state managed
    fn kind(&self) -> ResourceKind;

    /// Human-readable description of what this resource ensures
    fn description(&self) -> String;

    /// Kind-specific parameters
    ///
    /// Two declarations sharing a key must produce equal params. May contain
    /// secrets; never log it.
    fn params(&self) -> serde_json::Value;

    /// Keys that must reach Satisfied or Applied before this one runs
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Units to restart once after the run if this resource was applied
    fn notifies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Inspect live host state. Must not mutate anything.
    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult>;

    /// Bring the host into the desired state
    ///
    /// Only called after an unsatisfied probe, but must stay harmless when
    /// the state already holds.
    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// A resource with ordering and notification metadata attached
///
/// Concrete resources describe *what*; `Declared` adds *where it sits* in
/// a plan (custom key, dependencies, restart notifications).
#[derive(Debug)]
pub struct Declared {
    inner: BoxedResource,
    key: Option<String>,
    depends_on: Vec<String>,
    notifies: Vec<String>,
}

impl Declared {
    pub fn new(resource: impl Resource + 'static) -> Self {
        Self::from_boxed(Box::new(resource))
    }

    pub fn from_boxed(inner: BoxedResource) -> Self {
        Self {
            inner,
            key: None,
            depends_on: Vec::new(),
            notifies: Vec::new(),
        }
    }

    /// Override the key reported by the inner resource
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a dependency edge
    pub fn after(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.depends_on.contains(&key) {
            self.depends_on.push(key);
        }
        self
    }

    /// Add several dependency edges
    pub fn after_all<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self = self.after(key);
        }
        self
    }

    /// Restart `unit` after the run if this resource is applied
    pub fn notify(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        if !self.notifies.contains(&unit) {
            self.notifies.push(unit);
        }
        self
    }

    pub fn boxed(self) -> BoxedResource {
        Box::new(self)
    }
}

impl Resource for Declared {
    fn key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.inner.key())
    }

    fn kind(&self) -> ResourceKind {
        self.inner.kind()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn params(&self) -> serde_json::Value {
        self.inner.params()
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.inner.depends_on();
        for dep in &self.depends_on {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        deps
    }

    fn notifies(&self) -> Vec<String> {
        let mut units = self.inner.notifies();
        for unit in &self.notifies {
            if !units.contains(unit) {
                units.push(unit.clone());
            }
        }
        units
    }

    fn probe(&self, ctx: &HostContext) -> Result<ProbeResult> {
        self.inner.probe(ctx)
    }

    fn apply(&self, ctx: &HostContext) -> Result<ApplyResult> {
        self.inner.apply(ctx)
    }
}

/// Extension trait for attaching plan metadata to any resource
pub trait ResourceExt: Resource + Sized + 'static {
    /// Wrap in a [`Declared`] to add key, dependencies or notifications
    fn declare(self) -> Declared {
        Declared::new(self)
    }

    /// Shorthand for `declare().after(key)`
    fn after(self, key: impl Into<String>) -> Declared {
        Declared::new(self).after(key)
    }
}

impl<R: Resource + Sized + 'static> ResourceExt for R {}
