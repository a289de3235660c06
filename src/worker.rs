//! Isolated worker slots
//!
//! etcpack writes scratch files next to itself, so every slot gets a
//! private copy of the whole tool directory. Slots are only touched from
//! the scheduler's control flow; the busy flag needs no locking.

use anyhow::{bail, Context, Result};
use futures::future::try_join_all;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One execution environment with its own copy of the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlot {
    pub id: usize,
    /// Private tool directory, also the process working directory
    pub dir: PathBuf,
    pub busy: bool,
}

impl WorkerSlot {
    pub fn new(id: usize, dir: PathBuf) -> Self {
        Self {
            id,
            dir,
            busy: false,
        }
    }

    /// Slot-private directory the tool writes its output into
    pub fn output_dir(&self) -> PathBuf {
        self.dir.join("out")
    }
}

/// Fixed set of worker slots for the lifetime of a run
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
}

impl WorkerPool {
    pub fn new(slots: Vec<WorkerSlot>) -> Self {
        Self { slots }
    }

    /// Wipe `root` and materialize `n` copies of `tool_dir` as `root/0..n`.
    ///
    /// All copies must succeed; there is no partial pool.
    pub async fn provision(tool_dir: &Path, root: &Path, n: usize) -> Result<Self> {
        if n == 0 {
            bail!("Cannot provision an empty worker pool");
        }
        if !tool_dir.is_dir() {
            bail!("Tool directory not found: {}", tool_dir.display());
        }

        if root.exists() {
            fs::remove_dir_all(root)
                .with_context(|| format!("Failed to clear worker root: {}", root.display()))?;
        }
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create worker root: {}", root.display()))?;
        let root = std::path::absolute(root)
            .with_context(|| format!("Invalid worker root: {}", root.display()))?;

        info!("Provisioning {} workers from {}", n, tool_dir.display());

        let copies = (0..n).map(|id| {
            let src = tool_dir.to_path_buf();
            let dest = root.join(id.to_string());
            async move {
                let slot_dir = dest.clone();
                tokio::task::spawn_blocking(move || copy_tree(&src, &slot_dir))
                    .await
                    .context("Worker copy task panicked")??;
                Ok::<_, anyhow::Error>(WorkerSlot::new(id, dest))
            }
        });

        let slots = try_join_all(copies).await?;
        info!("Provisioned {} workers under {}", slots.len(), root.display());

        Ok(Self::new(slots))
    }

    /// Lowest-index idle slot, if any
    pub fn acquire_idle(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.busy)
    }

    pub fn mark_busy(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.busy = true;
        }
    }

    pub fn release(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.busy = false;
        }
    }

    pub fn slot(&self, id: usize) -> Option<&WorkerSlot> {
        self.slots.get(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.busy).count()
    }
}

/// Recursively copy a directory, keeping file permissions (the tool binary
/// must stay executable)
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("Walked path outside source tree")?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }

        reflink_copy::reflink_or_copy(entry.path(), &target).with_context(|| {
            format!(
                "Failed to copy {} -> {}",
                entry.path().display(),
                target.display()
            )
        })?;
        let perms = entry.metadata()?.permissions();
        fs::set_permissions(&target, perms)
            .with_context(|| format!("Failed to set permissions on {}", target.display()))?;
    }

    debug!("Copied {} -> {}", src.display(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool_of(n: usize) -> WorkerPool {
        WorkerPool::new(
            (0..n)
                .map(|i| WorkerSlot::new(i, PathBuf::from(format!("/w/{}", i))))
                .collect(),
        )
    }

    #[test]
    fn test_acquire_idle_lowest_index_first() {
        let mut pool = pool_of(3);
        assert_eq!(pool.acquire_idle(), Some(0));

        pool.mark_busy(0);
        assert_eq!(pool.acquire_idle(), Some(1));

        pool.mark_busy(1);
        pool.mark_busy(2);
        assert_eq!(pool.acquire_idle(), None);
        assert_eq!(pool.busy_count(), 3);

        pool.release(1);
        assert_eq!(pool.acquire_idle(), Some(1));
    }

    #[tokio::test]
    async fn test_provision_copies_tool_per_slot() -> Result<()> {
        let tmp = TempDir::new()?;
        let tool = tmp.path().join("tool");
        fs::create_dir_all(tool.join("lib"))?;
        fs::write(tool.join("etcpack"), b"#!/bin/sh\n")?;
        fs::write(tool.join("lib/convert"), b"bin")?;

        let root = tmp.path().join("worker");
        fs::create_dir_all(root.join("stale"))?;

        let pool = WorkerPool::provision(&tool, &root, 3).await?;
        assert_eq!(pool.len(), 3);
        assert!(!root.join("stale").exists());

        for id in 0..3 {
            let slot = pool.slot(id).unwrap();
            assert_eq!(slot.dir, root.join(id.to_string()));
            assert!(slot.dir.join("etcpack").is_file());
            assert!(slot.dir.join("lib/convert").is_file());
            assert!(!slot.busy);
        }
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provision_keeps_executable_bit() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new()?;
        let tool = tmp.path().join("tool");
        fs::create_dir_all(&tool)?;
        fs::write(tool.join("etcpack"), b"#!/bin/sh\n")?;
        fs::set_permissions(tool.join("etcpack"), fs::Permissions::from_mode(0o755))?;

        let pool = WorkerPool::provision(&tool, &tmp.path().join("worker"), 1).await?;
        let mode = fs::metadata(pool.slot(0).unwrap().dir.join("etcpack"))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
        Ok(())
    }

    #[tokio::test]
    async fn test_provision_missing_tool_is_fatal() -> Result<()> {
        let tmp = TempDir::new()?;
        let result =
            WorkerPool::provision(&tmp.path().join("nope"), &tmp.path().join("worker"), 2).await;
        assert!(result.is_err());
        Ok(())
    }
}
