//! Execution planner - validates and orders resource plans

use crate::error::PlanError;
use crate::resource::{BoxedResource, Resource};
use crate::types::ResourceKind;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// An ordered list of declared resources
///
/// Declaration order is significant: it is the tie-break when
/// dependencies leave the order open.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub resources: Vec<BoxedResource>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    /// Add a resource to the end of the plan
    pub fn add(&mut self, resource: impl Resource + 'static) {
        self.resources.push(Box::new(resource));
    }

    /// Add an already boxed resource
    pub fn add_boxed(&mut self, resource: BoxedResource) {
        self.resources.push(resource);
    }

    /// Append many resources
    pub fn extend(&mut self, resources: impl IntoIterator<Item = BoxedResource>) {
        self.resources.extend(resources);
    }

    /// Filter plan to resources matching a predicate, plus everything they depend on
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Resource) -> bool,
    {
        let keep = self
            .resources
            .iter()
            .map(|r| predicate(r.as_ref()))
            .collect();
        self.retain_with_dependencies(keep)
    }

    /// Filter plan to only include resources matching a target pattern
    ///
    /// Target format: "kind" or "kind.name" (name matches as a substring of the key).
    /// Dependencies of selected resources are kept so the plan still validates.
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (kind, name) = parse_target(t);
                self.filter(|r| matches_filter(r, kind.as_deref(), name.as_deref()))
            }
        }
    }

    fn retain_with_dependencies(self, mut keep: Vec<bool>) -> Self {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, resource) in self.resources.iter().enumerate() {
            by_key.entry(resource.key()).or_default().push(idx);
        }

        let mut stack: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(idx, k)| k.then_some(idx))
            .collect();

        while let Some(idx) = stack.pop() {
            for dep in self.resources[idx].depends_on() {
                for &dep_idx in by_key.get(&dep).map(Vec::as_slice).unwrap_or_default() {
                    if !keep[dep_idx] {
                        keep[dep_idx] = true;
                        stack.push(dep_idx);
                    }
                }
            }
        }

        Self {
            resources: self
                .resources
                .into_iter()
                .zip(keep)
                .filter_map(|(r, k)| k.then_some(r))
                .collect(),
        }
    }

    /// Total number of declared resources (before deduplication)
    pub fn total_resources(&self) -> usize {
        self.resources.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Validate keys and dependencies and compute the execution order
    ///
    /// Exact duplicates (same key, kind and params) are merged, with their
    /// dependency and notification sets unioned. Nothing here touches the host.
    pub fn validate(self) -> Result<ValidatedPlan, PlanError> {
        let mut resources: Vec<BoxedResource> = Vec::new();
        let mut dep_keys: Vec<Vec<String>> = Vec::new();
        let mut notifies: Vec<Vec<String>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for resource in self.resources {
            let key = resource.key();
            if let Some(&existing) = index.get(&key) {
                let first = &resources[existing];
                if first.kind() != resource.kind() || first.params() != resource.params() {
                    return Err(PlanError::DeclarationConflict { key });
                }
                log::debug!("Merging duplicate declaration of {key}");
                union_into(&mut dep_keys[existing], resource.depends_on());
                union_into(&mut notifies[existing], resource.notifies());
                continue;
            }

            index.insert(key, resources.len());
            dep_keys.push(resource.depends_on());
            notifies.push(resource.notifies());
            resources.push(resource);
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(resources.len());
        for (idx, keys) in dep_keys.iter().enumerate() {
            let mut resolved = Vec::with_capacity(keys.len());
            for dep in keys {
                let dep_idx = index.get(dep).copied().ok_or_else(|| {
                    PlanError::UnknownDependency {
                        key: resources[idx].key(),
                        missing: dep.clone(),
                    }
                })?;
                if !resolved.contains(&dep_idx) {
                    resolved.push(dep_idx);
                }
            }
            deps.push(resolved);
        }

        let order = topological_order(&deps).map_err(|cycle| PlanError::DependencyCycle {
            keys: cycle.into_iter().map(|idx| resources[idx].key()).collect(),
        })?;

        Ok(ValidatedPlan {
            resources,
            deps,
            notifies,
            order,
        })
    }
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<BoxedResource> for ExecutionPlan {
    fn from_iter<I: IntoIterator<Item = BoxedResource>>(iter: I) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

/// A plan whose keys are unique and whose dependencies are acyclic
pub struct ValidatedPlan {
    resources: Vec<BoxedResource>,
    deps: Vec<Vec<usize>>,
    notifies: Vec<Vec<String>>,
    order: Vec<usize>,
}

impl ValidatedPlan {
    /// Number of distinct resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resource indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn resource(&self, idx: usize) -> &dyn Resource {
        self.resources[idx].as_ref()
    }

    /// Indices of the resources `idx` depends on
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    /// Units `idx` asks to restart when applied
    pub fn notifies(&self, idx: usize) -> &[String] {
        &self.notifies[idx]
    }

    /// Resources in execution order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Resource> {
        self.order.iter().map(|&idx| self.resources[idx].as_ref())
    }

    /// Keys in execution order
    pub fn keys(&self) -> Vec<String> {
        self.iter().map(Resource::key).collect()
    }
}

fn union_into(target: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Kahn's algorithm with declaration order as the tie-break
///
/// On failure returns the indices of one dependency cycle.
fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (idx, list) in deps.iter().enumerate() {
        in_degree[idx] = list.len();
        for &dep in list {
            dependents[dep].push(idx);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&idx| in_degree[idx] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for &next in &dependents[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Every unordered node still waits on an unordered dependency, so
    // walking those edges from any of them must revisit a node.
    let mut placed = vec![false; n];
    for &idx in &order {
        placed[idx] = true;
    }
    let Some(start) = (0..n).find(|&idx| !placed[idx]) else {
        return Ok(order);
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&d| !placed[d]) else {
            return Err(path);
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            return Err(path.split_off(pos));
        }
        path.push(next);
        current = next;
    }
}

/// Parse a target string like "kind.name" into (kind, name)
///
/// Only the first dot separates, so names may contain dots (file paths).
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None if is_kind_filter(target) => (Some(target.to_string()), None),
        None => (None, Some(target.to_string())),
        Some((kind, name)) if is_kind_filter(kind) => {
            (Some(kind.to_string()), Some(name.to_string()))
        }
        Some(_) => (None, Some(target.to_string())),
    }
}

fn is_kind_filter(s: &str) -> bool {
    matches!(
        s,
        "package"
            | "packages"
            | "pkg"
            | "line"
            | "lines"
            | "file"
            | "files"
            | "service"
            | "services"
            | "service_enabled"
            | "service_running"
            | "firewall"
            | "ufw"
            | "user"
            | "users"
            | "exec"
            | "commands"
    )
}

/// Check if a resource matches the filter criteria
fn matches_filter(resource: &dyn Resource, kind: Option<&str>, name: Option<&str>) -> bool {
    if let Some(k) = kind {
        // Allow common aliases
        let matches_kind = match k {
            "packages" | "pkg" => resource.kind() == ResourceKind::PackageInstalled,
            "lines" => resource.kind() == ResourceKind::LinePresentInFile,
            "files" => resource.kind() == ResourceKind::FileContentExact,
            "service" | "services" => matches!(
                resource.kind(),
                ResourceKind::ServiceEnabled | ResourceKind::ServiceRunning
            ),
            "ufw" => resource.kind() == ResourceKind::FirewallRuleAllow,
            "users" => resource.kind() == ResourceKind::UserExists,
            "commands" => resource.kind() == ResourceKind::Exec,
            _ => resource.kind().as_str() == k,
        };
        if !matches_kind {
            return false;
        }
    }

    if let Some(n) = name
        && !resource.key().contains(n)
    {
        return false;
    }

    true
}
