//! Instance templates - one declaration, N numbered instances
//!
//! A group `{ss, 3, 8388}` expands to instances `ss1`, `ss2`, `ss3` on
//! ports 8388, 8389, 8390, each with its own secret. The caller's `build`
//! closure turns every instance into the resources it needs.

use crate::error::TemplateError;
use crate::resource::BoxedResource;
use crate::secret::{Secret, SecretSpec};
use std::collections::{BTreeMap, HashMap};

/// A parameterized "N instances" declaration
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    /// Key prefix; instance `i` gets key `{base_name}{i}`
    pub base_name: String,
    pub count: usize,
    /// Port of instance 1; later instances count up from here
    pub port_range_start: u16,
    /// Per-instance port overrides, by instance key
    pub explicit_ports: BTreeMap<String, u16>,
    /// Known secrets, by instance key; missing ones are generated
    pub secrets: BTreeMap<String, Secret>,
    pub secret_spec: SecretSpec,
    /// Parameters shared by every instance
    pub fixed_params: serde_json::Map<String, serde_json::Value>,
}

impl InstanceGroup {
    pub fn new(base_name: impl Into<String>, count: usize, port_range_start: u16) -> Self {
        Self {
            base_name: base_name.into(),
            count,
            port_range_start,
            explicit_ports: BTreeMap::new(),
            secrets: BTreeMap::new(),
            secret_spec: SecretSpec::default(),
            fixed_params: serde_json::Map::new(),
        }
    }

    pub fn with_port(mut self, key: impl Into<String>, port: u16) -> Self {
        self.explicit_ports.insert(key.into(), port);
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, secret: Secret) -> Self {
        self.secrets.insert(key.into(), secret);
        self
    }

    pub fn with_secret_spec(mut self, spec: SecretSpec) -> Self {
        self.secret_spec = spec;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fixed_params.insert(name.into(), value);
        self
    }

    /// Key of instance `index` (1-based)
    pub fn instance_key(&self, index: usize) -> String {
        format!("{}{}", self.base_name, index)
    }
}

/// One concrete instance of a group
#[derive(Debug, Clone)]
pub struct Instance {
    /// 1-based position in the group
    pub index: usize,
    pub key: String,
    pub port: u16,
    pub secret: Secret,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Result of expanding a group
#[derive(Debug)]
pub struct Expansion {
    pub instances: Vec<Instance>,
    pub resources: Vec<BoxedResource>,
    /// Secrets created during this expansion, by instance key
    pub generated: Vec<(String, Secret)>,
}

/// Expand a group into instances and their resources
///
/// Every check happens before any secret is generated, so a rejected group
/// has no side effects.
pub fn expand<F>(group: &InstanceGroup, mut build: F) -> Result<Expansion, TemplateError>
where
    F: FnMut(&Instance) -> Vec<BoxedResource>,
{
    if group.count == 0 {
        return Err(TemplateError::EmptyGroup {
            base: group.base_name.clone(),
        });
    }

    let keys: Vec<String> = (1..=group.count).map(|i| group.instance_key(i)).collect();

    if let Some(unknown) = group.explicit_ports.keys().find(|k| !keys.contains(k)) {
        return Err(TemplateError::UnknownInstance {
            base: group.base_name.clone(),
            key: unknown.clone(),
        });
    }

    let mut ports = Vec::with_capacity(group.count);
    let mut seen: HashMap<u16, &str> = HashMap::new();
    for (offset, key) in keys.iter().enumerate() {
        let port = match group.explicit_ports.get(key) {
            Some(&port) => u32::from(port),
            None => u32::from(group.port_range_start) + offset as u32,
        };
        let port = u16::try_from(port)
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| TemplateError::PortOutOfRange {
                key: key.clone(),
                port,
            })?;
        if let Some(first) = seen.insert(port, key.as_str()) {
            return Err(TemplateError::DuplicatePort {
                port,
                first: first.to_string(),
                second: key.clone(),
            });
        }
        ports.push(port);
    }

    group.secret_spec.validate()?;

    let mut expansion = Expansion {
        instances: Vec::with_capacity(group.count),
        resources: Vec::new(),
        generated: Vec::new(),
    };

    for (offset, (key, port)) in keys.into_iter().zip(ports).enumerate() {
        let secret = match group.secrets.get(&key) {
            Some(secret) => secret.clone(),
            None => {
                let secret = group.secret_spec.generate()?;
                log::debug!("Generated secret for {key}");
                expansion.generated.push((key.clone(), secret.clone()));
                secret
            }
        };

        let instance = Instance {
            index: offset + 1,
            key,
            port,
            secret,
            params: group.fixed_params.clone(),
        };
        expansion.resources.extend(build(&instance));
        expansion.instances.push(instance);
    }

    Ok(expansion)
}
