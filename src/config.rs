//! Run configuration
//!
//! Defines the settings for one compression run and the directory layout
//! derived from the work directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compressor::{ToolLocation, DEFAULT_TIMEOUT};
use crate::profile::Profile;
use crate::scheduler::DEFAULT_RETRY_CEILING;

/// Build output scanned when no directory is given
pub const DEFAULT_BUILD_DIR: &str = "build/jsb-link/assets/resources";

/// Configuration for a compression run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the build output to convert
    pub build_dir: PathBuf,

    pub profile: Profile,

    /// Directory holding etcpack and its support files
    pub tool_dir: PathBuf,

    /// Holds `worker/`, `temp/` and `log/`
    pub work_dir: PathBuf,

    /// Number of worker slots
    pub workers: usize,

    /// Attempts per image before giving up
    pub retry_ceiling: u32,

    /// Hard limit for one etcpack invocation
    pub timeout: Duration,

    pub tool: ToolLocation,
}

impl RunConfig {
    /// Defaults for everything but the build dir and profile
    pub fn new(build_dir: PathBuf, profile: Profile, work_dir: PathBuf) -> Self {
        Self {
            build_dir,
            profile,
            tool_dir: default_tool_dir(&work_dir),
            work_dir,
            workers: default_workers(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            timeout: DEFAULT_TIMEOUT,
            tool: ToolLocation::platform_default(),
        }
    }

    /// Parent of the per-slot tool copies
    pub fn worker_root(&self) -> PathBuf {
        self.work_dir.join("worker")
    }

    /// Parent of the per-profile artifact directories
    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.temp_dir().join("temp.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("log")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.build_dir.is_dir() {
            return Err(ConfigError::BuildDirNotFound(self.build_dir.clone()));
        }

        if !self.tool_dir.is_dir() {
            return Err(ConfigError::ToolDirNotFound(self.tool_dir.clone()));
        }

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if self.retry_ceiling == 0 {
            return Err(ConfigError::ZeroRetryCeiling);
        }

        Ok(())
    }
}

/// One worker per available CPU thread
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Bundled etcpack build for the current platform
pub fn default_tool_dir(work_dir: &Path) -> PathBuf {
    let platform = if cfg!(windows) { "Windows_64" } else { "OSX_x86" };
    work_dir.join("mali").join(platform)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Build directory not found: {0}")]
    BuildDirNotFound(PathBuf),

    #[error("Compressor tool directory not found: {0}")]
    ToolDirNotFound(PathBuf),

    #[error("At least one worker is required")]
    NoWorkers,

    #[error("Retry ceiling must be at least 1")]
    ZeroRetryCeiling,
}
