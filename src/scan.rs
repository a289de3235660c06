//! Build tree scan
//!
//! Collects every `.png`/`.jpg` under the build root. Images without a
//! sidecar descriptor can't be retagged and are reported instead of queued.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::asset::AssetItem;

/// Scan result
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Images ready for compression
    pub items: Vec<AssetItem>,
    /// Images whose sidecar descriptor is missing
    pub errors: Vec<PathBuf>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.items.len() + self.errors.len()
    }
}

/// Walk `root` and classify candidate images
pub fn scan_build_dir(root: &Path) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
        if !entry.file_type().is_file() || !AssetItem::is_image(entry.path()) {
            continue;
        }

        let Some(item) = AssetItem::from_path(entry.path()) else {
            debug!("Skipping non UTF-8 path: {}", entry.path().display());
            continue;
        };

        if item.sidecar_path().is_file() {
            report.items.push(item);
        } else {
            debug!("No descriptor for {}", entry.path().display());
            report.errors.push(entry.path().to_path_buf());
        }
    }

    info!(
        "Scanned {}: {} images, {} without descriptor",
        root.display(),
        report.items.len(),
        report.errors.len()
    );
    Ok(report)
}
