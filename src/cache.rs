//! Cross-run artifact cache
//!
//! Maps `profile -> sha1 -> artifact path relative to the temp dir`, stored
//! as a single JSON document. Loaded once at start of run and rewritten in
//! full at the end; entries recorded mid-run are lost if the run crashes.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::profile::Profile;

type Namespace = BTreeMap<String, String>;

/// Digest-keyed cache of previously produced artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStore {
    /// Directory artifact paths are relative to
    root: PathBuf,
    entries: BTreeMap<String, Namespace>,
}

impl CacheStore {
    /// Empty store rooted at the temp dir
    pub fn new(root: &Path) -> Self {
        let mut store = Self {
            root: root.to_path_buf(),
            entries: BTreeMap::new(),
        };
        store.ensure_namespaces();
        store
    }

    /// Load the cache file at `path`, or start empty if it doesn't exist
    pub fn load(path: &Path, root: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No cache file at {}, starting empty", path.display());
            return Ok(Self::new(root));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let entries: BTreeMap<String, Namespace> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;

        let mut store = Self {
            root: root.to_path_buf(),
            entries,
        };
        store.ensure_namespaces();

        info!("Loaded {} cache entries from {}", store.len(), path.display());
        Ok(store)
    }

    /// Every known profile gets a namespace, even an empty one
    fn ensure_namespaces(&mut self) {
        for profile in Profile::ALL {
            self.entries.entry(profile.name().to_string()).or_default();
        }
    }

    /// Absolute artifact path for a digest, only if the artifact still exists
    pub fn lookup(&self, profile: Profile, digest: &str) -> Option<PathBuf> {
        let relative = self.entries.get(profile.name())?.get(digest)?;
        let artifact = self.root.join(relative);

        if artifact.is_file() {
            Some(artifact)
        } else {
            debug!("Stale cache entry {} -> {}", digest, artifact.display());
            None
        }
    }

    /// Insert or overwrite an entry
    pub fn record(&mut self, profile: Profile, digest: &str, artifact_relative: &str) {
        self.entries
            .entry(profile.name().to_string())
            .or_default()
            .insert(digest.to_string(), artifact_relative.to_string());
    }

    /// Write the full mapping to `path`, replacing any previous file
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content =
            serde_json::to_string(&self.entries).context("Failed to serialize cache")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;

        info!("Saved {} cache entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Total number of entries across all profiles
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache value for an artifact: `<profile>/<file name>`
pub fn relative_artifact_path(profile: Profile, file_name: &str) -> String {
    format!("{}/{}", profile.name(), file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_starts_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::load(&dir.path().join("temp.json"), dir.path())?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_lookup_requires_artifact_on_disk() -> Result<()> {
        let dir = TempDir::new()?;
        let mut store = CacheStore::new(dir.path());
        store.record(Profile::Etc1, "abc", "etc1/hero.pkm");

        // Entry without artifact is a miss
        assert_eq!(store.lookup(Profile::Etc1, "abc"), None);

        std::fs::create_dir_all(dir.path().join("etc1"))?;
        std::fs::write(dir.path().join("etc1/hero.pkm"), b"pkm")?;
        assert_eq!(
            store.lookup(Profile::Etc1, "abc"),
            Some(dir.path().join("etc1/hero.pkm"))
        );

        // Namespaces are independent
        assert_eq!(store.lookup(Profile::Etc2, "abc"), None);
        Ok(())
    }

    #[test]
    fn test_persist_then_load_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("temp.json");

        let mut store = CacheStore::new(dir.path());
        store.record(Profile::Etc1, "aaa", "etc1/a.pkm");
        store.record(Profile::Etc2, "bbb", "etc2/b.pkm");
        store.record(Profile::Etc1, "aaa", "etc1/a2.pkm");
        store.persist(&path)?;

        let loaded = CacheStore::load(&path, dir.path())?;
        assert_eq!(loaded, store);
        assert_eq!(loaded.len(), 2);
        Ok(())
    }

    #[test]
    fn test_persisted_shape() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("temp.json");

        let mut store = CacheStore::new(dir.path());
        store.record(Profile::Etc2, "bbb", "etc2/b.pkm");
        store.persist(&path)?;

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(
            value,
            serde_json::json!({ "etc1": {}, "etc2": { "bbb": "etc2/b.pkm" } })
        );
        Ok(())
    }

    #[test]
    fn test_load_rejects_garbage() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("temp.json");
        std::fs::write(&path, "not json")?;
        assert!(CacheStore::load(&path, dir.path()).is_err());
        Ok(())
    }
}
