//! External compressor invocation
//!
//! Runs etcpack for one source image inside a worker slot. The tool writes
//! into the slot's private output directory; on a zero exit the artifact is
//! moved to `<temp>/<profile>/<name>.pkm`, which is what the cache refers to.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::asset::AssetItem;
use crate::profile::{Profile, ARTIFACT_EXTENSION};
use crate::worker::WorkerSlot;

/// Default hard limit for a single etcpack run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Invocation failures. All of them are retryable.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("Compressor not found on search path: {0}")]
    ToolNotFound(String),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compressor exited with code {code:?}")]
    Exit { code: Option<i32> },

    #[error("Compressor timed out after {0:?}")]
    Timeout(Duration),

    #[error("Compressor succeeded but produced no artifact at {0}")]
    MissingArtifact(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a compressed artifact for one asset on one worker slot
#[allow(async_fn_in_trait)]
pub trait Compressor {
    /// Returns the artifact path on success
    async fn compress(
        &self,
        item: &AssetItem,
        slot: &WorkerSlot,
        profile: Profile,
    ) -> Result<PathBuf, CompressError>;
}

/// Where the etcpack executable lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLocation {
    /// Looked up on the search path (slot directory first)
    SearchPath(String),
    /// Inside the slot's private tool directory
    SlotLocal(String),
}

impl ToolLocation {
    /// `etcpack.exe` from the search path on Windows, `<slot>/etcpack` elsewhere
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            ToolLocation::SearchPath("etcpack.exe".to_string())
        } else {
            ToolLocation::SlotLocal("etcpack".to_string())
        }
    }

    fn resolve(&self, slot_dir: &Path, search_path: &OsString) -> Result<PathBuf, CompressError> {
        match self {
            ToolLocation::SearchPath(name) => which::which_in(name, Some(search_path), slot_dir)
                .map_err(|_| CompressError::ToolNotFound(name.clone())),
            ToolLocation::SlotLocal(name) => Ok(slot_dir.join(name)),
        }
    }
}

/// etcpack process runner
#[derive(Debug, Clone)]
pub struct EtcPack {
    pub tool: ToolLocation,
    /// Root of the per-profile artifact directories
    pub temp_dir: PathBuf,
    pub timeout: Duration,
}

impl EtcPack {
    pub fn new(tool: ToolLocation, temp_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            tool,
            temp_dir,
            timeout,
        }
    }

    /// Final location of an item's artifact
    pub fn artifact_path(&self, item: &AssetItem, profile: Profile) -> PathBuf {
        self.temp_dir
            .join(profile.name())
            .join(format!("{}.{}", item.name, ARTIFACT_EXTENSION))
    }

    /// Argument list for one invocation
    pub fn build_args(item: &AssetItem, output_dir: &Path, profile: Profile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![item.path().into(), output_dir.into()];
        args.extend(profile.codec_args().iter().map(OsString::from));
        args.push("-ext".into());
        args.push(item.format_flag().into());
        args
    }

    /// Slot directory prepended to the inherited search path
    fn search_path(slot_dir: &Path) -> OsString {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let dirs = std::iter::once(slot_dir.to_path_buf()).chain(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).unwrap_or(inherited)
    }

    async fn run(
        &self,
        item: &AssetItem,
        slot: &WorkerSlot,
        profile: Profile,
    ) -> Result<PathBuf, CompressError> {
        let staging = slot.output_dir();
        tokio::fs::create_dir_all(&staging).await?;

        let staged = staging.join(format!("{}.{}", item.name, ARTIFACT_EXTENSION));
        if tokio::fs::metadata(&staged).await.is_ok() {
            tokio::fs::remove_file(&staged).await?;
        }

        let search_path = Self::search_path(&slot.dir);
        let program = self.tool.resolve(&slot.dir, &search_path)?;
        let args = Self::build_args(item, &staging, profile);

        debug!(slot = slot.id, "{} {:?}", program.display(), args);

        let mut child = Command::new(&program)
            .args(&args)
            .env("PATH", &search_path)
            .current_dir(&slot.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CompressError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let slot_id = slot.id;

        let supervised = async {
            let (_, _, status) = tokio::join!(
                pump_lines(stdout, slot_id, false),
                pump_lines(stderr, slot_id, true),
                child.wait()
            );
            status
        };

        let status = match tokio::time::timeout(self.timeout, supervised).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(slot = slot.id, "etcpack timed out on {}, killing", item);
                if let Err(e) = child.kill().await {
                    warn!(slot = slot.id, "Failed to kill etcpack: {}", e);
                }
                return Err(CompressError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            return Err(CompressError::Exit {
                code: status.code(),
            });
        }

        if tokio::fs::metadata(&staged).await.is_err() {
            return Err(CompressError::MissingArtifact(staged));
        }

        let artifact = self.artifact_path(item, profile);
        if let Some(parent) = artifact.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::rename(&staged, &artifact).await.is_err() {
            // Staging and temp dir may sit on different filesystems
            tokio::fs::copy(&staged, &artifact).await?;
            tokio::fs::remove_file(&staged).await?;
        }

        Ok(artifact)
    }
}

impl Compressor for EtcPack {
    async fn compress(
        &self,
        item: &AssetItem,
        slot: &WorkerSlot,
        profile: Profile,
    ) -> Result<PathBuf, CompressError> {
        info!(slot = slot.id, "Compressing {} ({})", item, profile);

        let result = self.run(item, slot, profile).await;
        if let Err(e) = &result {
            error!(slot = slot.id, "Compression failed for {}: {}", item, e);
        }
        result
    }
}

/// Forward a child's output to the log line by line as it arrives
async fn pump_lines<R>(stream: Option<R>, slot: usize, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if is_stderr {
            error!(slot, "[etcpack] {}", line);
        } else {
            info!(slot, "[etcpack] {}", line);
        }
    }
}
