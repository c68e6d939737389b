//! A scripted Debian host for resource tests
//!
//! Understands the handful of dpkg/apt/systemctl/ufw/user commands the
//! resources issue and keeps just enough state to answer probes.

use anyhow::Result;
use declarative::{CommandOutput, CommandRunner, CommandSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct HostState {
    pub installed: BTreeSet<String>,
    /// Installed and pinned with `apt-mark hold`
    pub held: BTreeSet<String>,
    /// Unpacked but never configured
    pub half_configured: BTreeSet<String>,
    /// Installable only after `apt-get update`
    pub needs_index: BTreeSet<String>,
    /// Never installable
    pub unknown_packages: BTreeSet<String>,
    pub index_fresh: bool,

    pub enabled: BTreeSet<String>,
    /// Fixed `is-enabled` answers (`static`, `alias`, `masked`, ...)
    pub unit_files: BTreeMap<String, String>,
    pub active: BTreeSet<String>,
    /// Units that accept `start` but never become active
    pub broken_units: BTreeSet<String>,
    pub restarted: Vec<String>,

    pub ufw_installed: bool,
    pub ufw_rules: Vec<String>,

    pub users: BTreeMap<String, BTreeSet<String>>,
    pub shells: BTreeMap<String, String>,
    pub passwords: BTreeMap<String, String>,

    /// Generic markers for guarded commands (`flag-check`/`flag-set`)
    pub flags: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    log: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.with(|s| s.ufw_installed = true);
        host
    }

    /// Inspect or tweak the simulated state
    pub fn with<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Every command line run so far
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Commands that would change the host
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| {
                [
                    "apt-get",
                    "systemctl enable",
                    "systemctl start",
                    "systemctl restart",
                    "ufw allow",
                    "ufw --force",
                    "useradd",
                    "usermod",
                    "chpasswd",
                    "flag-set",
                    "hostnamectl",
                ]
                .iter()
                .any(|p| c.starts_with(p))
            })
            .collect()
    }

    fn respond(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let mut s = self.state.lock().unwrap();

        let out = match (spec.program.as_str(), args.as_slice()) {
            ("dpkg-query", [_, _, pkgs @ ..]) => {
                let mut stdout = String::new();
                let mut all = true;
                for pkg in pkgs {
                    if s.installed.contains(*pkg) {
                        let selection = if s.held.contains(*pkg) { "hold" } else { "install" };
                        stdout.push_str(&format!("{pkg} {selection} ok installed\n"));
                    } else if s.half_configured.contains(*pkg) {
                        stdout.push_str(&format!("{pkg} install ok half-configured\n"));
                    } else {
                        all = false;
                    }
                }
                CommandOutput {
                    stdout: stdout.into_bytes(),
                    stderr: Vec::new(),
                    success: all,
                }
            }
            ("apt-get", ["update", ..]) => {
                s.index_fresh = true;
                CommandOutput::ok("Reading package lists... Done\n")
            }
            ("apt-get", ["install", rest @ ..]) => {
                let pkgs: Vec<&str> = rest.iter().copied().filter(|a| !a.starts_with('-')).collect();
                let blocked = pkgs.iter().find(|p| {
                    s.unknown_packages.contains(**p) || (s.needs_index.contains(**p) && !s.index_fresh)
                });
                match blocked {
                    Some(p) => CommandOutput::failed(format!("E: Unable to locate package {p}\n")),
                    None => {
                        for p in pkgs {
                            s.installed.insert(p.to_string());
                        }
                        CommandOutput::ok("")
                    }
                }
            }
            ("systemctl", ["is-enabled", unit]) => {
                if let Some(state) = s.unit_files.get(*unit) {
                    CommandOutput {
                        stdout: format!("{state}\n").into_bytes(),
                        stderr: Vec::new(),
                        success: state != "masked",
                    }
                } else if s.enabled.contains(*unit) {
                    CommandOutput::ok("enabled\n")
                } else {
                    CommandOutput {
                        stdout: b"disabled\n".to_vec(),
                        stderr: Vec::new(),
                        success: false,
                    }
                }
            }
            ("systemctl", ["enable", unit]) => {
                s.enabled.insert((*unit).to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["is-active", unit]) => {
                if s.active.contains(*unit) {
                    CommandOutput::ok("active\n")
                } else {
                    CommandOutput {
                        stdout: b"inactive\n".to_vec(),
                        stderr: Vec::new(),
                        success: false,
                    }
                }
            }
            ("systemctl", ["start", unit]) => {
                if !s.broken_units.contains(*unit) {
                    s.active.insert((*unit).to_string());
                }
                CommandOutput::ok("")
            }
            ("systemctl", ["restart", unit]) => {
                if s.broken_units.contains(*unit) {
                    return Ok(CommandOutput::failed(format!("Job for {unit}.service failed.\n")));
                }
                s.restarted.push((*unit).to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["status", unit, ..]) => {
                CommandOutput::ok(format!("{unit} - failed (Result: exit-code)\n"))
            }
            ("journalctl", _) => CommandOutput::ok("bind() to 0.0.0.0:8388 failed\n"),
            ("sh", ["-c", script]) if script.starts_with("command -v ") => {
                let program = script.trim_start_matches("command -v ");
                match program {
                    "ufw" if s.ufw_installed => CommandOutput::ok("/usr/sbin/ufw\n"),
                    _ => CommandOutput::failed(""),
                }
            }
            ("ufw", ["show", "added"]) => {
                let mut out = String::from("Added user rules (see 'ufw status' for running firewall):\n");
                if s.ufw_rules.is_empty() {
                    out.push_str("(None)\n");
                }
                for rule in &s.ufw_rules {
                    out.push_str(&format!("ufw allow {rule}\n"));
                }
                CommandOutput::ok(out)
            }
            ("ufw", ["allow", rule]) => {
                if s.ufw_rules.iter().any(|r| r == rule) {
                    CommandOutput::ok("Skipping adding existing rule\n")
                } else {
                    s.ufw_rules.push((*rule).to_string());
                    CommandOutput::ok("Rules updated\n")
                }
            }
            ("getent", ["passwd", name]) => match s.users.get(*name) {
                Some(_) => CommandOutput::ok(format!(
                    "{name}:x:1000:1000::/home/{name}:{}\n",
                    s.shells.get(*name).map_or("/bin/sh", String::as_str)
                )),
                None => CommandOutput::failed(""),
            },
            ("id", ["-nG", name]) => match s.users.get(*name) {
                Some(groups) => {
                    let mut all = vec![(*name).to_string()];
                    all.extend(groups.iter().cloned());
                    CommandOutput::ok(format!("{}\n", all.join(" ")))
                }
                None => CommandOutput::failed(format!("id: '{name}': no such user\n")),
            },
            ("useradd", rest) => {
                let name = rest.last().copied().unwrap_or_default().to_string();
                let mut groups = BTreeSet::new();
                let mut shell = "/bin/sh".to_string();
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    match *arg {
                        "-G" => {
                            if let Some(list) = iter.next() {
                                groups.extend(list.split(',').map(str::to_string));
                            }
                        }
                        "-s" => {
                            if let Some(sh) = iter.next() {
                                shell = (*sh).to_string();
                            }
                        }
                        _ => {}
                    }
                }
                if s.users.contains_key(&name) {
                    CommandOutput::failed(format!("useradd: user '{name}' already exists\n"))
                } else {
                    s.users.insert(name.clone(), groups);
                    s.shells.insert(name, shell);
                    CommandOutput::ok("")
                }
            }
            ("usermod", ["-aG", list, name]) => match s.users.get_mut(*name) {
                Some(groups) => {
                    groups.extend(list.split(',').map(str::to_string));
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(format!("usermod: user '{name}' does not exist\n")),
            },
            ("chpasswd", []) => {
                let input = String::from_utf8_lossy(spec.stdin.as_deref().unwrap_or_default())
                    .to_string();
                match input.trim_end().split_once(':') {
                    Some((name, pw)) => {
                        s.passwords.insert(name.to_string(), pw.to_string());
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed("chpasswd: line 1: missing new password\n"),
                }
            }
            ("flag-check", [flag]) => {
                if s.flags.contains(*flag) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed("")
                }
            }
            ("flag-set", [flag]) => {
                s.flags.insert((*flag).to_string());
                CommandOutput::ok("")
            }
            ("false", _) => CommandOutput::failed("failed\n"),
            _ => anyhow::bail!("fake host does not understand `{}`", spec.display()),
        };
        Ok(out)
    }
}

impl CommandRunner for FakeHost {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.log.lock().unwrap().push(spec.display());
        self.respond(spec)
    }
}
