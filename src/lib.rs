//! etcpress - ETC texture compression for Cocos native builds
//!
//! Converts the PNG/JPG textures of a build tree to `.pkm` with etcpack,
//! running one tool copy per CPU, and retags each texture's descriptor.
//! Artifacts are cached by source SHA-1 so repeated runs only compress
//! what changed.

pub mod applier;
pub mod asset;
pub mod cache;
pub mod compressor;
pub mod config;
pub mod descriptor;
pub mod hash;
pub mod logging;
pub mod profile;
pub mod scan;
pub mod scheduler;
pub mod worker;

pub use applier::{ApplyError, ResultApplier};
pub use asset::AssetItem;
pub use cache::CacheStore;
pub use compressor::{CompressError, Compressor, EtcPack, ToolLocation};
pub use config::{ConfigError, RunConfig};
pub use profile::Profile;
pub use scan::{scan_build_dir, ScanReport};
pub use scheduler::{RunReport, Scheduler};
pub use worker::{WorkerPool, WorkerSlot};
