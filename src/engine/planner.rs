//! Host description → execution plan
//!
//! Every table becomes one or more resources with kind-prefixed keys.
//! Edges the config author would otherwise have to spell out (package
//! before the unit it ships, rules before `ufw enable`) are added here.

use anyhow::{Context, Result};
use declarative::{
    BoxedResource, Declared, ExecutionPlan, Instance, InstanceGroup, ResourceExt, Secret,
    SecretSpec, expand,
};
use std::collections::HashMap;

use crate::resource::{
    Exec, FileContentExact, FirewallRuleAllow, LinePresentInFile, PackageInstalled, Proto,
    ServiceEnabled, ServiceRunning, UserExists,
};
use crate::schema::{HostConfig, ShadowsocksGroup};
use crate::state::SecretsStore;

pub const SYSCTL_PATH: &str = "/etc/sysctl.d/99-vpsctl.conf";
const SYSCTL_UNIT: &str = "systemd-sysctl";
const SHADOWSOCKS_PACKAGE: &str = "shadowsocks-libev";
const UFW_PACKAGE: &str = "ufw";
const SSH_PACKAGE: &str = "openssh-server";

/// A running proxy instance, for the post-run summary
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub key: String,
    pub port: u16,
    pub method: String,
    pub password: Secret,
}

/// Output of compiling a host description
#[derive(Debug)]
pub struct Compiled {
    pub plan: ExecutionPlan,
    pub endpoints: Vec<Endpoint>,
    /// Secrets created for this plan that the store doesn't hold yet
    pub generated: Vec<(String, Secret)>,
}

/// Compile `config` into a plan, reusing secrets from `store`
pub fn compile(config: &HostConfig, store: &SecretsStore) -> Result<Compiled> {
    let mut compiler = Compiler::new(config, store);
    compiler.host()?;
    compiler.packages();
    compiler.users()?;
    compiler.ssh()?;
    compiler.sysctl()?;
    compiler.files()?;
    compiler.lines()?;
    compiler.firewall_rules();
    compiler.shadowsocks()?;
    compiler.services();
    compiler.exec()?;
    compiler.firewall_enable();

    log::debug!(
        "Compiled {} resources ({} new secrets)",
        compiler.plan.total_resources(),
        compiler.generated.len()
    );

    Ok(Compiled {
        plan: compiler.plan,
        endpoints: compiler.endpoints,
        generated: compiler.generated,
    })
}

struct Compiler<'a> {
    config: &'a HostConfig,
    store: &'a SecretsStore,
    plan: ExecutionPlan,
    /// Package name → key of the resource installing it
    providers: HashMap<String, String>,
    ufw_rules: Vec<String>,
    endpoints: Vec<Endpoint>,
    generated: Vec<(String, Secret)>,
}

impl<'a> Compiler<'a> {
    fn new(config: &'a HostConfig, store: &'a SecretsStore) -> Self {
        let mut providers = HashMap::new();
        for name in &config.packages.install {
            providers.insert(name.clone(), format!("pkg:{name}"));
        }
        for set in &config.package_sets {
            for name in &set.packages {
                providers
                    .entry(name.clone())
                    .or_insert_with(|| format!("pkg:{}", set.name));
            }
        }

        Self {
            config,
            store,
            plan: ExecutionPlan::new(),
            providers,
            ufw_rules: Vec::new(),
            endpoints: Vec::new(),
            generated: Vec::new(),
        }
    }

    fn config(&self) -> &'a HostConfig {
        self.config
    }

    /// Key of the declared resource installing `package`, if any
    fn provider(&self, package: &str) -> Option<String> {
        self.providers.get(package).cloned()
    }

    fn push(&mut self, resource: Declared) {
        self.plan.add_boxed(resource.boxed());
    }

    fn host(&mut self) -> Result<()> {
        let host = &self.config().host;
        if let Some(name) = &host.hostname {
            let exec = Exec::new(
                "hostname",
                sh(&format!("test \"$(hostname)\" = {}", quote(name))),
                argv(&["hostnamectl", "set-hostname", name]),
            )?
            .with_description(format!("Set hostname to {name}"));
            self.push(exec.declare().after_all(host.depends_on.clone()));
        }
        if let Some(zone) = &host.timezone {
            let exec = Exec::new(
                "timezone",
                sh(&format!(
                    "test \"$(timedatectl show -p Timezone --value)\" = {}",
                    quote(zone)
                )),
                argv(&["timedatectl", "set-timezone", zone]),
            )?
            .with_description(format!("Set timezone to {zone}"));
            self.push(exec.declare().after_all(host.depends_on.clone()));
        }
        Ok(())
    }

    fn packages(&mut self) {
        let section = &self.config().packages;
        for name in &section.install {
            self.push(
                PackageInstalled::new(name)
                    .declare()
                    .after_all(section.depends_on.clone()),
            );
        }
        for set in &self.config().package_sets {
            self.push(
                PackageInstalled::set(&set.name, &set.packages)
                    .declare()
                    .after_all(set.depends_on.clone()),
            );
        }
    }

    fn users(&mut self) -> Result<()> {
        for decl in &self.config().users {
            let mut user = UserExists::new(&decl.name).with_groups(&decl.groups);
            if let Some(shell) = &decl.shell {
                user = user.with_shell(shell);
            }

            let store_key = format!("user:{}", decl.name);
            let password = match (&decl.password, decl.generate_password) {
                (Some(password), _) => Some(Secret::new(password.clone())),
                (None, true) => Some(self.stored_or_generated(&store_key)?),
                (None, false) => None,
            };
            if let Some(password) = password {
                user = user.with_password(password);
            }

            self.push(user.declare().after_all(decl.depends_on.clone()));
        }
        Ok(())
    }

    fn stored_or_generated(&mut self, key: &str) -> Result<Secret> {
        if let Some(secret) = self.store.get(key) {
            return Ok(secret.clone());
        }
        let secret = SecretSpec::default()
            .generate()
            .with_context(|| format!("Failed to generate secret for {key}"))?;
        self.generated.push((key.to_string(), secret.clone()));
        Ok(secret)
    }

    fn ssh(&mut self) -> Result<()> {
        let Some(ssh) = &self.config().ssh else {
            return Ok(());
        };

        let mut directives: Vec<(&str, String)> = Vec::new();
        if let Some(port) = ssh.port {
            directives.push(("Port", port.to_string()));
        }
        if let Some(value) = &ssh.permit_root_login {
            directives.push(("PermitRootLogin", value.clone()));
        }
        if let Some(enabled) = ssh.password_authentication {
            let value = if enabled { "yes" } else { "no" };
            directives.push(("PasswordAuthentication", value.to_string()));
        }

        let provider = self.provider(SSH_PACKAGE);
        for (directive, value) in directives {
            // Also matches the commented-out defaults Debian ships
            let pattern = format!(r"^#?\s*{directive}\s");
            let line = LinePresentInFile::new(
                &ssh.config_path,
                Some(&pattern),
                &format!("{directive} {value}"),
            )?;
            let declared = line
                .declare()
                .with_key(format!("sshd:{directive}"))
                .after_all(provider.clone())
                .after_all(ssh.depends_on.clone())
                .notify(ssh.unit.clone());
            self.push(declared);
        }
        Ok(())
    }

    fn sysctl(&mut self) -> Result<()> {
        let Some(sysctl) = &self.config().sysctl else {
            return Ok(());
        };
        if sysctl.settings.is_empty() {
            return Ok(());
        }
        let content = sysctl.render()?;
        self.push(
            FileContentExact::new(SYSCTL_PATH, content)
                .with_mode(0o644)
                .declare()
                .after_all(sysctl.depends_on.clone())
                .notify(SYSCTL_UNIT),
        );
        Ok(())
    }

    fn files(&mut self) -> Result<()> {
        for decl in &self.config().files {
            let mut file = FileContentExact::new(&decl.path, decl.content.as_bytes());
            if let Some(mode) = &decl.mode {
                file = file.with_mode(mode.bits(&decl.path)?);
            }
            let mut declared = file.declare().after_all(decl.depends_on.clone());
            for unit in &decl.notify {
                declared = declared.notify(unit.clone());
            }
            self.push(declared);
        }
        Ok(())
    }

    fn lines(&mut self) -> Result<()> {
        for decl in &self.config().lines {
            let line = LinePresentInFile::new(&decl.path, decl.pattern.as_deref(), &decl.line)
                .with_context(|| format!("Invalid line for {}", decl.path))?;
            let mut declared = line.declare().after_all(decl.depends_on.clone());
            for unit in &decl.notify {
                declared = declared.notify(unit.clone());
            }
            self.push(declared);
        }
        Ok(())
    }

    fn allow(&mut self, port: u16, proto: Proto, depends_on: &[String]) {
        let rule = FirewallRuleAllow::new(port, proto);
        let key = format!("ufw:{port}/{proto}");
        if !self.ufw_rules.contains(&key) {
            self.ufw_rules.push(key);
        }
        let declared = rule
            .declare()
            .after_all(self.provider(UFW_PACKAGE))
            .after_all(depends_on.to_vec());
        self.push(declared);
    }

    fn firewall_rules(&mut self) {
        let Some(firewall) = &self.config().firewall else {
            return;
        };
        for rule in &firewall.allow {
            self.allow(rule.port, rule.proto, &firewall.depends_on);
        }
    }

    fn shadowsocks(&mut self) -> Result<()> {
        for group in &self.config().shadowsocks {
            self.shadowsocks_group(group)?;
        }
        Ok(())
    }

    fn shadowsocks_group(&mut self, decl: &ShadowsocksGroup) -> Result<()> {
        let mut group = InstanceGroup::new(&decl.name, decl.count, decl.port_start)
            .with_secret_spec(decl.secret.clone());
        for (key, port) in &decl.ports {
            group = group.with_port(key.clone(), *port);
        }
        for index in 1..=decl.count {
            let key = group.instance_key(index);
            let secret = match decl.passwords.get(&key) {
                Some(password) => Some(Secret::new(password.clone())),
                None => self.store.get(&key).cloned(),
            };
            if let Some(secret) = secret {
                group = group.with_secret(key, secret);
            }
        }

        let package = self.provider(SHADOWSOCKS_PACKAGE);
        let ufw = self.provider(UFW_PACKAGE);
        let mode = decl.config_mode.bits(&decl.config_dir)?;
        let mut rules: Vec<(u16, Proto)> = Vec::new();

        let mut replaced = Vec::new();
        for unit in &decl.replaces {
            let key = format!("disabled:{unit}");
            let exec = Exec::shell(
                &key,
                &format!(
                    "! systemctl is-enabled --quiet {unit} && ! systemctl is-active --quiet {unit}",
                    unit = quote(unit)
                ),
                &format!("systemctl disable --now {}", quote(unit)),
            )
            .with_description(format!("Stop and disable {unit}"));
            self.push(exec.declare().after_all(package.clone()));
            replaced.push(key);
        }

        let expansion = expand(&group, |instance| {
            let unit = format!("{}@{}", decl.unit, instance.key);
            let path = format!("{}/{}.json", decl.config_dir, instance.key);
            let mut resources: Vec<BoxedResource> = Vec::new();

            resources.push(
                FileContentExact::new(&path, render_shadowsocks(decl, instance))
                    .with_mode(mode)
                    .declare()
                    .with_key(instance.key.clone())
                    .after_all(package.clone())
                    .after_all(decl.depends_on.clone())
                    .notify(unit.clone())
                    .boxed(),
            );

            if decl.firewall {
                for &proto in decl.mode.protocols() {
                    rules.push((instance.port, proto));
                    resources.push(
                        FirewallRuleAllow::new(instance.port, proto)
                            .declare()
                            .after_all(ufw.clone())
                            .boxed(),
                    );
                }
            }

            resources.push(
                ServiceEnabled::new(&unit)
                    .after(instance.key.clone())
                    .after_all(replaced.clone())
                    .boxed(),
            );
            resources.push(
                ServiceRunning::new(&unit)
                    .after(format!("enabled:{unit}"))
                    .after(instance.key.clone())
                    .after_all(replaced.clone())
                    .boxed(),
            );
            resources
        })
        .with_context(|| format!("Invalid shadowsocks group `{}`", decl.name))?;

        for (port, proto) in rules {
            let key = format!("ufw:{port}/{proto}");
            if !self.ufw_rules.contains(&key) {
                self.ufw_rules.push(key);
            }
        }
        for instance in &expansion.instances {
            self.endpoints.push(Endpoint {
                key: instance.key.clone(),
                port: instance.port,
                method: decl.method.clone(),
                password: instance.secret.clone(),
            });
        }
        self.generated.extend(expansion.generated);
        self.plan.extend(expansion.resources);
        Ok(())
    }

    fn services(&mut self) {
        for decl in &self.config().services {
            let provider = decl.package.as_deref().and_then(|p| self.provider(p));
            if decl.enabled {
                self.push(
                    ServiceEnabled::new(&decl.unit)
                        .declare()
                        .after_all(provider.clone())
                        .after_all(decl.depends_on.clone()),
                );
            }
            if decl.running {
                let mut running = ServiceRunning::new(&decl.unit)
                    .declare()
                    .after_all(provider.clone())
                    .after_all(decl.depends_on.clone());
                if decl.enabled {
                    running = running.after(format!("enabled:{}", decl.unit));
                }
                self.push(running);
            }
        }
    }

    fn exec(&mut self) -> Result<()> {
        for decl in &self.config().exec {
            let mut exec = Exec::new(&decl.key, decl.check.argv(), decl.run.argv())?;
            if let Some(fallback) = &decl.fallback {
                exec = exec.with_fallback(fallback.argv());
            }
            if let Some(description) = &decl.description {
                exec = exec.with_description(description.clone());
            }
            let mut declared = exec.declare().after_all(decl.depends_on.clone());
            for unit in &decl.notify {
                declared = declared.notify(unit.clone());
            }
            self.push(declared);
        }
        Ok(())
    }

    /// `ufw enable` last, after every allow rule, so SSH stays reachable
    fn firewall_enable(&mut self) {
        let Some(firewall) = &self.config().firewall else {
            return;
        };
        if !firewall.enable {
            return;
        }
        let exec = Exec::shell(
            "ufw:enable",
            "ufw status | grep -q '^Status: active'",
            "ufw --force enable",
        )
        .with_description("Enable ufw");
        let declared = exec
            .declare()
            .after_all(self.provider(UFW_PACKAGE))
            .after_all(self.ufw_rules.clone())
            .after_all(firewall.depends_on.clone());
        self.push(declared);
    }
}

/// shadowsocks-libev server config for one instance
fn render_shadowsocks(decl: &ShadowsocksGroup, instance: &Instance) -> String {
    let config = serde_json::json!({
        "server": decl.server,
        "server_port": instance.port,
        "password": instance.secret.expose(),
        "timeout": decl.timeout,
        "method": decl.method,
        "fast_open": decl.fast_open,
        "mode": decl.mode.as_str(),
    });
    format!("{config:#}\n")
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

fn sh(script: &str) -> Vec<String> {
    argv(&["sh", "-c", script])
}

/// Single-quote `s` for `sh`
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compile_str(toml: &str) -> Compiled {
        let temp = TempDir::new().unwrap();
        let store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        compile(&HostConfig::parse(toml).unwrap(), &store).unwrap()
    }

    fn keys(compiled: &Compiled) -> Vec<String> {
        compiled.plan.resources.iter().map(|r| r.key()).collect()
    }

    fn deps_of(compiled: &Compiled, key: &str) -> Vec<String> {
        compiled
            .plan
            .resources
            .iter()
            .find(|r| r.key() == key)
            .map(|r| r.depends_on())
            .unwrap_or_default()
    }

    const SHADOWSOCKS: &str = r#"
[packages]
install = ["shadowsocks-libev", "ufw"]

[firewall]
enable = true
allow = [{ port = 22 }]

[[shadowsocks]]
count = 2
"#;

    #[test]
    fn shadowsocks_group_expands_per_instance() {
        let compiled = compile_str(SHADOWSOCKS);
        let keys = keys(&compiled);

        for expected in [
            "ss1",
            "ss2",
            "ufw:8388/tcp",
            "ufw:8388/udp",
            "ufw:8389/udp",
            "enabled:shadowsocks-libev-server@ss1",
            "running:shadowsocks-libev-server@ss2",
        ] {
            assert!(keys.contains(&expected.to_string()), "missing {expected}");
        }

        assert_eq!(deps_of(&compiled, "ss1"), vec!["pkg:shadowsocks-libev"]);
        assert_eq!(
            deps_of(&compiled, "running:shadowsocks-libev-server@ss1"),
            vec![
                "enabled:shadowsocks-libev-server@ss1",
                "ss1",
                "disabled:shadowsocks-libev"
            ]
        );
        assert_eq!(deps_of(&compiled, "ufw:8388/tcp"), vec!["pkg:ufw"]);

        assert_eq!(compiled.endpoints.len(), 2);
        assert_eq!(compiled.endpoints[1].port, 8389);
        assert_eq!(compiled.generated.len(), 2);
    }

    #[test]
    fn ufw_enable_waits_for_every_rule() {
        let compiled = compile_str(SHADOWSOCKS);
        let deps = deps_of(&compiled, "ufw:enable");
        for rule in ["pkg:ufw", "ufw:22/tcp", "ufw:8388/tcp", "ufw:8389/udp"] {
            assert!(deps.contains(&rule.to_string()), "missing {rule}");
        }
        assert_eq!(keys(&compiled).last().map(String::as_str), Some("ufw:enable"));
    }

    #[test]
    fn compiled_plan_validates() {
        let compiled = compile_str(SHADOWSOCKS);
        let validated = compiled.plan.validate().unwrap();
        // 2 packages, 1 rule, the packaged unit, 2 x (file + 2 rules + 2 units), ufw enable
        assert_eq!(validated.len(), 2 + 1 + 1 + 10 + 1);
    }

    #[test]
    fn shadowsocks_config_is_deterministic_json() {
        let temp = TempDir::new().unwrap();
        let mut store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        store.insert("ss1", Secret::new("pw-from-store"));
        let config = HostConfig::parse("[[shadowsocks]]\ncount = 1\nfirewall = false\n").unwrap();

        let first = compile(&config, &store).unwrap();
        let second = compile(&config, &store).unwrap();
        assert!(first.generated.is_empty());

        let params = |c: &Compiled| {
            c.plan
                .resources
                .iter()
                .find(|r| r.key() == "ss1")
                .map(|r| r.params())
                .unwrap()
        };
        assert_eq!(params(&first), params(&second));
        // Readable by the dynamic user the template unit runs as
        assert_eq!(params(&first)["mode"], 0o644);

        let content = params(&first)["content"].as_str().unwrap().to_string();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["password"], "pw-from-store");
        assert_eq!(json["server"], "0.0.0.0");
        assert_eq!(json["server_port"], 8388);
        assert_eq!(json["method"], "chacha20-ietf-poly1305");
        assert_eq!(json["mode"], "tcp_and_udp");
        assert_eq!(json["timeout"], 300);
        assert_eq!(json["fast_open"], false);
    }

    #[test]
    fn packaged_unit_is_disabled_before_instances_start() {
        let compiled = compile_str("[[shadowsocks]]\ncount = 1\nfirewall = false\n");

        let disable = compiled
            .plan
            .resources
            .iter()
            .find(|r| r.key() == "disabled:shadowsocks-libev")
            .unwrap();
        assert_eq!(
            disable.params()["run"][2],
            "systemctl disable --now 'shadowsocks-libev'"
        );
        assert!(
            deps_of(&compiled, "enabled:shadowsocks-libev-server@ss1")
                .contains(&"disabled:shadowsocks-libev".to_string())
        );
    }

    #[test]
    fn replaces_and_config_mode_are_configurable() {
        let compiled = compile_str(
            "[[shadowsocks]]\ncount = 1\nfirewall = false\nreplaces = []\nconfig_mode = \"0640\"\n",
        );
        assert!(!keys(&compiled).iter().any(|k| k.starts_with("disabled:")));
        let file = compiled
            .plan
            .resources
            .iter()
            .find(|r| r.key() == "ss1")
            .unwrap();
        assert_eq!(file.params()["mode"], 0o640);
    }

    #[test]
    fn configured_password_beats_store() {
        let temp = TempDir::new().unwrap();
        let mut store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        store.insert("ss1", Secret::new("stored"));
        let config =
            HostConfig::parse("[[shadowsocks]]\ncount = 1\npasswords = { ss1 = \"fixed\" }\n")
                .unwrap();

        let compiled = compile(&config, &store).unwrap();
        assert_eq!(compiled.endpoints[0].password.expose(), "fixed");
    }

    #[test]
    fn ssh_directives_notify_ssh() {
        let compiled = compile_str(
            "[packages]\ninstall = [\"openssh-server\"]\n\n[ssh]\npermit_root_login = \"no\"\npassword_authentication = false\n",
        );
        let line = compiled
            .plan
            .resources
            .iter()
            .find(|r| r.key() == "sshd:PermitRootLogin")
            .unwrap();
        assert_eq!(line.notifies(), vec!["ssh"]);
        assert_eq!(line.depends_on(), vec!["pkg:openssh-server"]);
        assert!(keys(&compiled).contains(&"sshd:PasswordAuthentication".to_string()));
    }

    #[test]
    fn services_depend_on_their_package() {
        let compiled = compile_str(
            "[[package_sets]]\nname = \"web\"\npackages = [\"nginx\", \"certbot\"]\n\n[[services]]\nunit = \"nginx\"\npackage = \"nginx\"\n",
        );
        assert_eq!(deps_of(&compiled, "enabled:nginx"), vec!["pkg:web"]);
        assert_eq!(
            deps_of(&compiled, "running:nginx"),
            vec!["pkg:web", "enabled:nginx"]
        );
    }

    #[test]
    fn user_password_is_generated_once() {
        let temp = TempDir::new().unwrap();
        let mut store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        let config =
            HostConfig::parse("[[users]]\nname = \"deploy\"\ngenerate_password = true\n").unwrap();

        let first = compile(&config, &store).unwrap();
        assert_eq!(first.generated.len(), 1);
        store.record(&first.generated);

        let second = compile(&config, &store).unwrap();
        assert!(second.generated.is_empty());
    }

    #[test]
    fn sysctl_and_host_exec() {
        let compiled = compile_str(
            "[host]\nhostname = \"edge-1\"\n\n[sysctl]\n\"net.ipv4.ip_forward\" = 1\n",
        );
        let keys = keys(&compiled);
        assert_eq!(keys[0], "hostname");
        assert!(keys.contains(&format!("file:{SYSCTL_PATH}")));

        let hostname = &compiled.plan.resources[0];
        assert_eq!(
            hostname.params()["check"][2],
            "test \"$(hostname)\" = 'edge-1'"
        );
    }

    #[test]
    fn bad_group_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        let config = HostConfig::parse("[[shadowsocks]]\ncount = 2\nports = { ss2 = 8388 }\n")
            .unwrap();
        let err = compile(&config, &store).unwrap_err();
        assert!(format!("{err:#}").contains("shadowsocks group `ss`"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
