//! Source image assets and their sidecar descriptors
//!
//! Cocos native builds keep raw textures under `.../native/...` and the
//! matching JSON descriptor under the parallel `.../import/...` tree.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Image extensions picked up by the scan (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 2] = ["png", "jpg"];

/// One source image queued for compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetItem {
    /// Directory holding the image
    pub dir: PathBuf,
    /// File name without extension
    pub name: String,
    /// Extension without the leading dot, as found on disk
    pub ext: String,
    /// Failed attempts so far
    pub retry_count: u32,
}

impl AssetItem {
    /// Build an item from an image path. Returns None when the path has no
    /// UTF-8 file stem or extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_stem().and_then(OsStr::to_str)?.to_string();
        let ext = path.extension().and_then(OsStr::to_str)?.to_string();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Some(Self {
            dir,
            name,
            ext,
            retry_count: 0,
        })
    }

    /// Whether a path looks like a convertible image
    pub fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Full path of the source image
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, self.ext))
    }

    /// Where the artifact lands next to the image (extension swapped)
    pub fn converted_path(&self, artifact_ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, artifact_ext))
    }

    /// Uppercased extension, as etcpack's `-ext` flag expects
    pub fn format_flag(&self) -> String {
        self.ext.to_uppercase()
    }

    /// Path of the JSON descriptor that accompanies this image
    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_dir(&self.dir).join(format!("{}.json", self.name))
    }
}

impl fmt::Display for AssetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Swap the first `native` component of an image directory for `import`
fn sidecar_dir(image_dir: &Path) -> PathBuf {
    let mut replaced = false;
    image_dir
        .components()
        .map(|c| match c {
            Component::Normal(part) if !replaced && part == "native" => {
                replaced = true;
                Component::Normal(OsStr::new("import"))
            }
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_splits_components() {
        let item = AssetItem::from_path(Path::new("/b/native/ab/abcd.PNG")).unwrap();
        assert_eq!(item.dir, PathBuf::from("/b/native/ab"));
        assert_eq!(item.name, "abcd");
        assert_eq!(item.ext, "PNG");
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.path(), PathBuf::from("/b/native/ab/abcd.PNG"));
        assert_eq!(item.format_flag(), "PNG");
    }

    #[test]
    fn test_sidecar_path_swaps_native_for_import() {
        let item = AssetItem::from_path(Path::new("/b/native/ab/abcd.png")).unwrap();
        assert_eq!(item.sidecar_path(), PathBuf::from("/b/import/ab/abcd.json"));
    }

    #[test]
    fn test_sidecar_path_only_first_native() {
        let item = AssetItem::from_path(Path::new("/b/native/native/x.jpg")).unwrap();
        assert_eq!(item.sidecar_path(), PathBuf::from("/b/import/native/x.json"));
    }

    #[test]
    fn test_converted_path() {
        let item = AssetItem::from_path(Path::new("/b/native/ab/abcd.jpg")).unwrap();
        assert_eq!(item.converted_path("pkm"), PathBuf::from("/b/native/ab/abcd.pkm"));
    }

    #[test]
    fn test_is_image() {
        assert!(AssetItem::is_image(Path::new("a.png")));
        assert!(AssetItem::is_image(Path::new("a.JPG")));
        assert!(!AssetItem::is_image(Path::new("a.json")));
        assert!(!AssetItem::is_image(Path::new("png")));
    }
}
