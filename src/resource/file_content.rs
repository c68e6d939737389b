//! File resource - exact content, written atomically

use anyhow::{Context, Result};
use declarative::{ApplyResult, HostContext, ProbeResult, Resource, ResourceKind};
use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const DEFAULT_MODE: u32 = 0o644;

/// A file whose bytes (and optionally mode) must match exactly
#[derive(Debug, Clone)]
pub struct FileContentExact {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub mode: Option<u32>,
}

impl FileContentExact {
    pub fn new(path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            content: content.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl Resource for FileContentExact {
    fn key(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::FileContentExact
    }

    fn description(&self) -> String {
        match self.mode {
            Some(mode) => format!("File {} (mode {mode:o})", self.path.display()),
            None => format!("File {}", self.path.display()),
        }
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path,
            "content": String::from_utf8_lossy(&self.content),
            "mode": self.mode,
        })
    }

    fn probe(&self, _ctx: &HostContext) -> Result<ProbeResult> {
        let current = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ProbeResult::unsatisfied("missing"));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        if current != self.content {
            return Ok(ProbeResult::unsatisfied("content differs"));
        }

        if let Some(want) = self.mode {
            let have = fs::metadata(&self.path)
                .with_context(|| format!("Failed to stat {}", self.path.display()))?
                .permissions()
                .mode()
                & 0o7777;
            if have != want {
                return Ok(ProbeResult::unsatisfied(format!(
                    "mode {have:o}, want {want:o}"
                )));
            }
        }

        Ok(ProbeResult::satisfied("up to date"))
    }

    fn apply(&self, _ctx: &HostContext) -> Result<ApplyResult> {
        let existed = self.path.exists();
        let mode = match self.mode {
            Some(mode) => mode,
            None => existing_mode(&self.path).unwrap_or(DEFAULT_MODE),
        };

        write_atomic(&self.path, &self.content, mode)?;

        Ok(if existed {
            ApplyResult::modified()
        } else {
            ApplyResult::created()
        })
    }
}

/// Permission bits of an existing file
pub fn existing_mode(path: &Path) -> Option<u32> {
    fs::metadata(path)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

/// Replace `path` with `content` so readers see either the old or the new file
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    stage(path, content, mode)?.commit()
}

/// A fully written and synced temporary file next to its target
#[derive(Debug)]
pub struct Staged {
    temp: NamedTempFile,
    target: PathBuf,
}

/// Write `content` to a temporary file in the target's directory
///
/// Nothing at `path` changes until [`Staged::commit`]. Dropping the stage
/// removes the temporary file.
pub fn stage(path: &Path, content: &[u8], mode: u32) -> Result<Staged> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    temp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .context("Failed to set permissions on temporary file")?;
    temp.write_all(content)
        .context("Failed to write temporary file")?;
    temp.as_file()
        .sync_all()
        .context("Failed to sync temporary file")?;

    Ok(Staged {
        temp,
        target: path.to_path_buf(),
    })
}

impl Staged {
    /// Rename over the target and sync the directory entry
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace {}", target.display()))?;

        if let Some(dir) = target.parent().filter(|p| !p.as_os_str().is_empty())
            && let Ok(handle) = File::open(dir)
        {
            let _ = handle.sync_all();
        }
        log::debug!("Wrote {}", target.display());
        Ok(())
    }
}
