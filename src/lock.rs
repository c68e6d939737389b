//! Run guards: the exclusive run lock and the root check

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "run.lock";

/// Exclusive lock held for the whole of an apply run
///
/// Backed by flock(2), so the kernel drops it if the process dies.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `state_dir`, failing fast if another run holds it
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;

        let path = state_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        // SAFETY: the descriptor is owned by `file` and outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                anyhow::bail!(
                    "Another vpsctl run is in progress (pid {}); lock: {}",
                    holder.trim(),
                    path.display()
                );
            }
            return Err(err).with_context(|| format!("Failed to lock {}", path.display()));
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("Failed to write lock file: {}", path.display()))?;

        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // SAFETY: unlocking our own descriptor.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        log::debug!("Released run lock {}", self.path.display());
    }
}

/// Whether the effective uid is root
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Refuse to continue unless running as root
pub fn ensure_root() -> Result<()> {
    if !is_root() {
        anyhow::bail!("This command changes system state and must run as root (try sudo)");
    }
    Ok(())
}
