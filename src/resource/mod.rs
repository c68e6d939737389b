//! Debian host resources
//!
//! Each resource pairs a read-only probe with a converging apply:
//! - Packages via dpkg-query / apt-get
//! - Files and lines, written atomically
//! - systemd units (enabled, running)
//! - ufw allow rules
//! - Local users
//! - Guarded commands for everything else

pub mod exec;
pub mod file_content;
pub mod firewall;
pub mod line_in_file;
pub mod package;
pub mod service;
pub mod user;

#[cfg(test)]
pub mod testing;

pub use exec::Exec;
pub use file_content::FileContentExact;
pub use firewall::{FirewallRuleAllow, Proto};
pub use line_in_file::LinePresentInFile;
pub use package::PackageInstalled;
pub use service::{ServiceEnabled, ServiceRunning};
pub use user::UserExists;

use declarative::CommandOutput;

/// Error for a command that ran but exited non-zero
pub(crate) fn command_failed(what: &str, output: &CommandOutput) -> anyhow::Error {
    let detail = output.combined();
    if detail.is_empty() {
        anyhow::anyhow!("{what} failed")
    } else {
        anyhow::anyhow!("{what} failed: {detail}")
    }
}
