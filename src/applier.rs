//! Applies a compressed artifact to the build tree
//!
//! Replaces `<name>.<png|jpg>` with `<name>.pkm`, retags the sidecar
//! descriptor and removes the source image. Everything that can fail
//! without touching the tree (reading, parsing, tag checks, staging copies)
//! runs first; the renames and the delete come last.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::asset::AssetItem;
use crate::descriptor::{CompressionTag, DescriptorError, SidecarDescriptor};
use crate::profile::{Profile, ARTIFACT_EXTENSION};

const STAGING_SUFFIX: &str = "etcpress-tmp";

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad descriptor {}: {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("Descriptor {} has tag '{tag}', not an uncompressed texture", .path.display())]
    UnrecognizedTag { path: PathBuf, tag: CompressionTag },
}

impl ApplyError {
    /// A descriptor that is already converted will not change on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ApplyError::UnrecognizedTag { .. })
    }

    fn io(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| ApplyError::Io {
            action,
            path,
            source,
        }
    }
}

/// Performs the on-disk substitution for one profile
#[derive(Debug, Clone)]
pub struct ResultApplier {
    profile: Profile,
}

impl ResultApplier {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    /// Apply `artifact` to `item`. Returns the path of the placed artifact.
    pub async fn apply(&self, item: &AssetItem, artifact: &Path) -> Result<PathBuf, ApplyError> {
        info!("Applying {} -> {}", artifact.display(), item);

        let sidecar = item.sidecar_path();
        let content = tokio::fs::read_to_string(&sidecar)
            .await
            .map_err(ApplyError::io("Failed to read", &sidecar))?;

        let mut descriptor =
            SidecarDescriptor::parse(&content).map_err(|source| ApplyError::Descriptor {
                path: sidecar.clone(),
                source,
            })?;
        let tag = descriptor
            .compression_tag()
            .map_err(|source| ApplyError::Descriptor {
                path: sidecar.clone(),
                source,
            })?;
        if !tag.is_uncompressed() {
            return Err(ApplyError::UnrecognizedTag { path: sidecar, tag });
        }

        let patched = descriptor
            .set_compression_tag(self.profile)
            .and_then(|_| descriptor.to_pretty_string())
            .map_err(|source| ApplyError::Descriptor {
                path: sidecar.clone(),
                source,
            })?;

        Staged::new(item, &sidecar, patched)
            .commit(artifact)
            .await
    }
}

/// Writes prepared for one item
struct Staged {
    source: PathBuf,
    converted: PathBuf,
    converted_tmp: PathBuf,
    sidecar: PathBuf,
    sidecar_tmp: PathBuf,
    patched: String,
}

impl Staged {
    fn new(item: &AssetItem, sidecar: &Path, patched: String) -> Self {
        let converted = item.converted_path(ARTIFACT_EXTENSION);
        Self {
            source: item.path(),
            converted_tmp: staging_path(&converted),
            converted,
            sidecar_tmp: staging_path(sidecar),
            sidecar: sidecar.to_path_buf(),
            patched,
        }
    }

    async fn commit(self, artifact: &Path) -> Result<PathBuf, ApplyError> {
        if let Err(e) = self.stage(artifact).await {
            self.discard().await;
            return Err(e);
        }

        tokio::fs::rename(&self.converted_tmp, &self.converted)
            .await
            .map_err(ApplyError::io("Failed to place", &self.converted))?;
        tokio::fs::rename(&self.sidecar_tmp, &self.sidecar)
            .await
            .map_err(ApplyError::io("Failed to replace", &self.sidecar))?;
        tokio::fs::remove_file(&self.source)
            .await
            .map_err(ApplyError::io("Failed to delete", &self.source))?;

        debug!("Replaced {} with {}", self.source.display(), self.converted.display());
        Ok(self.converted)
    }

    async fn stage(&self, artifact: &Path) -> Result<(), ApplyError> {
        tokio::fs::copy(artifact, &self.converted_tmp)
            .await
            .map_err(ApplyError::io("Failed to copy artifact to", &self.converted_tmp))?;
        tokio::fs::write(&self.sidecar_tmp, &self.patched)
            .await
            .map_err(ApplyError::io("Failed to write", &self.sidecar_tmp))?;
        Ok(())
    }

    async fn discard(&self) {
        for tmp in [&self.converted_tmp, &self.sidecar_tmp] {
            if tokio::fs::metadata(tmp).await.is_ok() {
                if let Err(e) = tokio::fs::remove_file(tmp).await {
                    warn!("Failed to remove staged file {}: {}", tmp.display(), e);
                }
            }
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::Value;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"[1,0,0,[],[],["0,9729,9729,33071,33071,0,0,1"],[0]]"#;

    struct Fixture {
        _tmp: TempDir,
        item: AssetItem,
        artifact: PathBuf,
    }

    fn fixture(descriptor: &str) -> Result<Fixture> {
        let tmp = TempDir::new()?;
        let native = tmp.path().join("res/native/ab");
        let import = tmp.path().join("res/import/ab");
        std::fs::create_dir_all(&native)?;
        std::fs::create_dir_all(&import)?;
        std::fs::write(native.join("hero.png"), b"png bytes")?;
        std::fs::write(import.join("hero.json"), descriptor)?;

        let artifact = tmp.path().join("temp/etc1/hero.pkm");
        std::fs::create_dir_all(artifact.parent().unwrap())?;
        std::fs::write(&artifact, b"pkm bytes")?;

        let item = AssetItem::from_path(&native.join("hero.png")).unwrap();
        Ok(Fixture {
            _tmp: tmp,
            item,
            artifact,
        })
    }

    #[tokio::test]
    async fn test_apply_replaces_image_and_patches_descriptor() -> Result<()> {
        let fx = fixture(DESCRIPTOR)?;
        let placed = ResultApplier::new(Profile::Etc1)
            .apply(&fx.item, &fx.artifact)
            .await?;

        assert_eq!(placed, fx.item.dir.join("hero.pkm"));
        assert_eq!(std::fs::read(&placed)?, b"pkm bytes");
        assert!(!fx.item.path().exists());
        // Cached artifact stays in place for later runs
        assert!(fx.artifact.exists());

        let content = std::fs::read_to_string(fx.item.sidecar_path())?;
        let value: Value = serde_json::from_str(&content)?;
        assert_eq!(value[5][0], "6@1026,9729,9729,33071,33071,0,0,1");
        assert!(content.contains("\n  "));
        Ok(())
    }

    #[tokio::test]
    async fn test_already_converted_is_rejected_untouched() -> Result<()> {
        let converted = r#"[1,0,0,[],[],["6@29,9729"],[0]]"#;
        let fx = fixture(converted)?;

        let err = ResultApplier::new(Profile::Etc2)
            .apply(&fx.item, &fx.artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::UnrecognizedTag { .. }));
        assert!(!err.is_retryable());

        assert!(fx.item.path().exists());
        assert!(!fx.item.dir.join("hero.pkm").exists());
        assert_eq!(std::fs::read_to_string(fx.item.sidecar_path())?, converted);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_artifact_leaves_tree_untouched() -> Result<()> {
        let fx = fixture(DESCRIPTOR)?;
        std::fs::remove_file(&fx.artifact)?;

        let err = ResultApplier::new(Profile::Etc1)
            .apply(&fx.item, &fx.artifact)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        assert!(fx.item.path().exists());
        assert_eq!(std::fs::read_to_string(fx.item.sidecar_path())?, DESCRIPTOR);
        let leftovers: Vec<_> = std::fs::read_dir(&fx.item.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("hero.png")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_descriptor_is_retryable_error() -> Result<()> {
        let fx = fixture("{broken")?;
        let err = ResultApplier::new(Profile::Etc1)
            .apply(&fx.item, &fx.artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Descriptor { .. }));
        assert!(fx.item.path().exists());
        Ok(())
    }

    #[test]
    fn test_staging_path_is_sibling() {
        assert_eq!(
            staging_path(Path::new("/a/b/hero.pkm")),
            PathBuf::from("/a/b/hero.pkm.etcpress-tmp")
        );
    }
}
