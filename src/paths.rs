//! Centralized path resolution for vpsctl
//!
//! # Environment Variables
//!
//! - `VPSCTL_CONFIG` - Override the host description file
//! - `VPSCTL_STATE_DIR` - Override the state directory (secrets store, run lock)
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` flag
//! 2. `VPSCTL_CONFIG` environment variable
//! 3. `/etc/vpsctl/host.toml`, if it exists
//! 4. `~/.config/vpsctl/host.toml`, if it exists
//! 5. `/etc/vpsctl/host.toml`
//!
//! For state_dir():
//! 1. `VPSCTL_STATE_DIR` environment variable
//! 2. `/var/lib/vpsctl`

use std::path::{Path, PathBuf};

/// Environment variable for config file override
pub const ENV_CONFIG: &str = "VPSCTL_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "VPSCTL_STATE_DIR";

const SYSTEM_CONFIG: &str = "/etc/vpsctl/host.toml";
const SYSTEM_STATE_DIR: &str = "/var/lib/vpsctl";

/// Resolve the host description file
pub fn config_file(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return expand(&path.to_string_lossy());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG) {
        let path = expand(&path);
        log::debug!("Using config from {}: {}", ENV_CONFIG, path.display());
        return path;
    }

    let system = PathBuf::from(SYSTEM_CONFIG);
    if system.exists() {
        return system;
    }

    if let Some(user) = dirs::config_dir().map(|d| d.join("vpsctl").join("host.toml"))
        && user.exists()
    {
        log::debug!("Using user config: {}", user.display());
        return user;
    }

    system
}

/// Get the vpsctl state directory path
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return path;
    }
    PathBuf::from(SYSTEM_STATE_DIR)
}

/// Location of the secrets store inside a state directory
pub fn secrets_file(state_dir: &Path) -> PathBuf {
    state_dir.join("secrets.json")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
