use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::resource::file_content::write_atomic;

const SECRETS_MODE: u32 = 0o600;

// ============================================================================
// Secrets Store
// ============================================================================

/// A generated secret and when it was first generated
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredSecret {
    pub value: Secret,
    pub created_at: DateTime<Utc>,
}

/// Secrets generated on earlier runs, keyed by instance or user key.
///
/// Feeding these back into expansion keeps rendered configs byte-identical
/// from run to run, so a second apply finds everything satisfied.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SecretsStore {
    #[serde(default)]
    pub secrets: BTreeMap<String, StoredSecret>,

    #[serde(skip)]
    path: PathBuf,

    #[serde(skip)]
    dirty: bool,
}

impl SecretsStore {
    /// Load the store, or start an empty one if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Secrets file {} does not exist, starting empty", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
        let mut store: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))?;
        store.path = path.to_path_buf();

        log::debug!("Loaded {} secrets from {}", store.secrets.len(), path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Secret> {
        self.secrets.get(key).map(|s| &s.value)
    }

    /// Record a secret unless one is already stored under `key`
    pub fn insert(&mut self, key: &str, value: Secret) -> bool {
        if self.secrets.contains_key(key) {
            return false;
        }
        self.secrets.insert(
            key.to_string(),
            StoredSecret {
                value,
                created_at: Utc::now(),
            },
        );
        self.dirty = true;
        true
    }

    /// Record every newly generated secret; returns how many were new
    pub fn record(&mut self, generated: &[(String, Secret)]) -> usize {
        generated
            .iter()
            .filter(|(key, value)| self.insert(key, value.clone()))
            .count()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the store atomically with owner-only permissions
    pub fn save(&mut self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let mut content =
            serde_json::to_string_pretty(&self).context("Failed to serialize secrets")?;
        content.push('\n');
        write_atomic(&self.path, content.as_bytes(), SECRETS_MODE)
            .with_context(|| format!("Failed to write secrets file: {}", self.path.display()))?;

        self.dirty = false;
        log::debug!("Saved {} secrets to {}", self.secrets.len(), self.path.display());
        Ok(())
    }

    /// Save only when something new was recorded
    pub fn save_if_dirty(&mut self) -> Result<()> {
        if self.dirty { self.save() } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();
        assert!(store.secrets.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn round_trips_with_owner_only_mode() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("secrets.json");

        let mut store = SecretsStore::load(&path).unwrap();
        assert!(store.insert("ss1", Secret::new("aaaabbbbccccdddd")));
        store.save().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let reloaded = SecretsStore::load(&path).unwrap();
        assert_eq!(
            reloaded.get("ss1").map(Secret::expose),
            Some("aaaabbbbccccdddd")
        );
    }

    #[test]
    fn existing_secrets_are_never_replaced() {
        let temp = TempDir::new().unwrap();
        let mut store = SecretsStore::load(&temp.path().join("secrets.json")).unwrap();

        let generated = vec![
            ("ss1".to_string(), Secret::new("first")),
            ("ss2".to_string(), Secret::new("second")),
        ];
        assert_eq!(store.record(&generated), 2);

        let again = vec![("ss1".to_string(), Secret::new("other"))];
        assert_eq!(store.record(&again), 0);
        assert_eq!(store.get("ss1").map(Secret::expose), Some("first"));
    }

    #[test]
    fn save_if_dirty_skips_clean_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secrets.json");
        let mut store = SecretsStore::load(&path).unwrap();

        store.save_if_dirty().unwrap();
        assert!(!path.exists());

        store.insert("user:deploy", Secret::new("pw"));
        store.save_if_dirty().unwrap();
        assert!(path.exists());
        assert!(!store.is_dirty());
    }
}
