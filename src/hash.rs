//! Content digests used as cache keys.
//!
//! The cache is keyed by the SHA-1 of a source image's raw bytes, taken
//! before the pipeline touches the file.

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Compute SHA-1 of a file and return it as lowercase hex.
///
/// Uses streaming to handle large files without loading into memory.
pub fn compute_file_sha1(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(1024 * 1024, file); // 1MB buffer
    let mut buf = vec![0u8; 1024 * 1024];
    let mut hasher = Sha1::new();

    loop {
        let bytes_read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buf[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Async wrapper that keeps the read off the orchestrating task
pub async fn compute_file_sha1_async(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_file_sha1(&owned))
        .await
        .context("Hashing task panicked")?
}
