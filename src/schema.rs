//! Host description schema (`host.toml`)

use anyhow::{Context, Result};
use declarative::{RunPolicy, SecretSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::resource::Proto;

// ============================================================================
// Errors
// ============================================================================

/// A host description that parsed but makes no sense
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{table}: name must not be empty")]
    EmptyName { table: &'static str },

    #[error("invalid file mode `{mode}` for {path}")]
    InvalidMode { path: String, mode: String },

    #[error("sysctl `{key}`: value must be a string, integer, float or boolean")]
    InvalidSysctl { key: String },

    #[error("service {unit}: neither enabled nor running is requested")]
    NothingRequested { unit: String },

    #[error("run.jobs must be at least 1")]
    ZeroJobs,
}

// ============================================================================
// Main Config Schema
// ============================================================================

/// The full description of one host
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,

    /// Reconciler policy
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub packages: PackagesSection,

    #[serde(default)]
    pub package_sets: Vec<PackageSet>,

    #[serde(default)]
    pub users: Vec<UserDecl>,

    pub ssh: Option<SshSection>,

    pub sysctl: Option<SysctlSection>,

    #[serde(default)]
    pub files: Vec<FileDecl>,

    #[serde(default)]
    pub lines: Vec<LineDecl>,

    pub firewall: Option<FirewallSection>,

    #[serde(default)]
    pub shadowsocks: Vec<ShadowsocksGroup>,

    #[serde(default)]
    pub services: Vec<ServiceDecl>,

    #[serde(default)]
    pub exec: Vec<ExecDecl>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct HostSection {
    pub hostname: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RunSection {
    pub halt_on_failure: bool,
    /// Seconds before a single command is killed
    pub command_timeout: u64,
    /// Seconds to wait for a started unit to report active
    pub service_wait: u64,
    /// Concurrent probes during a survey
    pub jobs: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            halt_on_failure: false,
            command_timeout: 600,
            service_wait: 10,
            jobs: 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct PackagesSection {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Packages installed together in one apt transaction
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PackageSet {
    pub name: String,
    pub packages: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserDecl {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub shell: Option<String>,
    /// Initial password; takes precedence over `generate_password`
    pub password: Option<String>,
    #[serde(default)]
    pub generate_password: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SshSection {
    pub permit_root_login: Option<String>,
    pub password_authentication: Option<bool>,
    pub port: Option<u16>,
    #[serde(default = "default_sshd_config")]
    pub config_path: String,
    /// Unit restarted when a directive changes
    #[serde(default = "default_ssh_unit")]
    pub unit: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_sshd_config() -> String {
    "/etc/ssh/sshd_config".to_string()
}

fn default_ssh_unit() -> String {
    "ssh".to_string()
}

/// Kernel parameters, rendered into one sysctl.d drop-in
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SysctlSection {
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl SysctlSection {
    /// `key = value` lines in key order
    pub fn render(&self) -> Result<String, ConfigError> {
        let mut out = String::from("# Managed by vpsctl\n");
        for (key, value) in &self.settings {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => u8::from(*b).to_string(),
                _ => return Err(ConfigError::InvalidSysctl { key: key.clone() }),
            };
            let _ = writeln!(out, "{key} = {value}");
        }
        Ok(out)
    }
}

/// File mode, either `0o600` or `"0600"`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum FileMode {
    Bits(u32),
    Octal(String),
}

impl FileMode {
    pub fn bits(&self, path: &str) -> Result<u32, ConfigError> {
        let invalid = || ConfigError::InvalidMode {
            path: path.to_string(),
            mode: match self {
                Self::Bits(b) => format!("{b:o}"),
                Self::Octal(s) => s.clone(),
            },
        };
        let bits = match self {
            Self::Bits(b) => *b,
            Self::Octal(s) => {
                let digits = s.trim_start_matches("0o");
                u32::from_str_radix(digits, 8).map_err(|_| invalid())?
            }
        };
        if bits > 0o7777 {
            return Err(invalid());
        }
        Ok(bits)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileDecl {
    pub path: String,
    pub content: String,
    pub mode: Option<FileMode>,
    #[serde(default)]
    pub notify: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LineDecl {
    pub path: String,
    /// Regex for the line to replace; defaults to the exact line
    pub pattern: Option<String>,
    pub line: String,
    #[serde(default)]
    pub notify: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FirewallSection {
    /// Turn ufw on once every rule is in place
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub allow: Vec<FirewallAllow>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct FirewallAllow {
    pub port: u16,
    #[serde(default)]
    pub proto: Proto,
}

/// Protocols a shadowsocks server listens on
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    TcpOnly,
    UdpOnly,
    #[default]
    TcpAndUdp,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TcpOnly => "tcp_only",
            Self::UdpOnly => "udp_only",
            Self::TcpAndUdp => "tcp_and_udp",
        }
    }

    pub fn protocols(self) -> &'static [Proto] {
        match self {
            Self::TcpOnly => &[Proto::Tcp],
            Self::UdpOnly => &[Proto::Udp],
            Self::TcpAndUdp => &[Proto::Tcp, Proto::Udp],
        }
    }
}

/// `count` shadowsocks-libev servers on consecutive ports
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ShadowsocksGroup {
    #[serde(default = "default_ss_name")]
    pub name: String,
    pub count: usize,
    #[serde(default = "default_ss_port")]
    pub port_start: u16,
    /// Port overrides by instance key (`ss2 = 9000`)
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    /// Fixed passwords by instance key; the rest are generated once and stored
    #[serde(default)]
    pub passwords: BTreeMap<String, String>,
    #[serde(default = "default_ss_server")]
    pub server: String,
    #[serde(default = "default_ss_method")]
    pub method: String,
    #[serde(default = "default_ss_timeout")]
    pub timeout: u32,
    #[serde(default)]
    pub fast_open: bool,
    #[serde(default)]
    pub mode: RelayMode,
    #[serde(default)]
    pub secret: SecretSpec,
    /// Open each instance's port in ufw
    #[serde(default = "default_true")]
    pub firewall: bool,
    #[serde(default = "default_ss_config_dir")]
    pub config_dir: String,
    /// Template unit; the instance key is appended after `@`
    #[serde(default = "default_ss_unit")]
    pub unit: String,
    /// Instance config mode. Debian's template unit runs ss-server as a
    /// dynamic user, which has to be able to read it.
    #[serde(default = "default_ss_config_mode")]
    pub config_mode: FileMode,
    /// Units stopped and disabled before any instance starts
    #[serde(default = "default_ss_replaces")]
    pub replaces: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_ss_name() -> String {
    "ss".to_string()
}

fn default_ss_port() -> u16 {
    8388
}

fn default_ss_server() -> String {
    "0.0.0.0".to_string()
}

fn default_ss_method() -> String {
    "chacha20-ietf-poly1305".to_string()
}

fn default_ss_timeout() -> u32 {
    300
}

fn default_ss_config_dir() -> String {
    "/etc/shadowsocks-libev".to_string()
}

fn default_ss_unit() -> String {
    "shadowsocks-libev-server".to_string()
}

fn default_ss_config_mode() -> FileMode {
    FileMode::Bits(0o644)
}

/// The package enables its single-instance unit on install, on port 8388
fn default_ss_replaces() -> Vec<String> {
    vec!["shadowsocks-libev".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceDecl {
    pub unit: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub running: bool,
    /// Package providing the unit, for ordering
    pub package: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A command given as an argv array or as one `sh -c` script
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandLine {
    Argv(Vec<String>),
    Script(String),
}

impl CommandLine {
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv.clone(),
            Self::Script(script) => vec!["sh".into(), "-c".into(), script.clone()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecDecl {
    pub key: String,
    pub description: Option<String>,
    pub check: CommandLine,
    pub run: CommandLine,
    pub fallback: Option<CommandLine>,
    #[serde(default)]
    pub notify: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl HostConfig {
    /// Read, parse and validate a host description
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read host config: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid host config: {}", path.display()))?;
        log::debug!("Loaded host config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks serde can't express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }
        if self.package_sets.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::EmptyName {
                table: "package_sets",
            });
        }
        if self.users.iter().any(|u| u.name.trim().is_empty()) {
            return Err(ConfigError::EmptyName { table: "users" });
        }
        if self.shadowsocks.iter().any(|g| g.name.trim().is_empty()) {
            return Err(ConfigError::EmptyName {
                table: "shadowsocks",
            });
        }
        if self.exec.iter().any(|e| e.key.trim().is_empty()) {
            return Err(ConfigError::EmptyName { table: "exec" });
        }
        for file in &self.files {
            if let Some(mode) = &file.mode {
                mode.bits(&file.path)?;
            }
        }
        for group in &self.shadowsocks {
            group.config_mode.bits(&group.config_dir)?;
        }
        if let Some(sysctl) = &self.sysctl {
            sysctl.render()?;
        }
        for service in &self.services {
            if !service.enabled && !service.running {
                return Err(ConfigError::NothingRequested {
                    unit: service.unit.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> RunPolicy {
        RunPolicy {
            halt_on_first_failure: self.run.halt_on_failure,
            command_timeout: Duration::from_secs(self.run.command_timeout),
            service_wait: Duration::from_secs(self.run.service_wait),
        }
    }
}
