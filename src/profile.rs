//! Compression profiles
//!
//! A profile selects the codec, speed and pixel-format flags passed to
//! etcpack, and the storage tag written into each asset's sidecar descriptor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension of the artifacts etcpack writes
pub const ARTIFACT_EXTENSION: &str = "pkm";

/// Supported output formats
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// ETC1 with alpha-aware compression
    Etc1,
    /// ETC2 with RGBA output
    Etc2,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Etc1, Profile::Etc2];

    /// Name used for the cache namespace and the temp subdirectory
    pub fn name(&self) -> &'static str {
        match self {
            Profile::Etc1 => "etc1",
            Profile::Etc2 => "etc2",
        }
    }

    /// Storage tag the asset runtime expects once the texture is converted
    pub fn sidecar_tag(&self) -> &'static str {
        match self {
            Profile::Etc1 => "6@1026",
            Profile::Etc2 => "6@29",
        }
    }

    /// Codec, speed and pixel-format flags for etcpack
    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            Profile::Etc1 => &["-c", "etc1", "-s", "slow", "-aa"],
            Profile::Etc2 => &["-c", "etc2", "-s", "slow", "-f", "RGBA"],
        }
    }

    /// Parse from a profile name (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "etc1" => Some(Profile::Etc1),
            "etc2" => Some(Profile::Etc2),
            _ => None,
        }
    }

    /// Inverse of [`Profile::sidecar_tag`]
    pub fn from_sidecar_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.sidecar_tag() == tag)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_args_per_profile() {
        assert_eq!(Profile::Etc1.codec_args(), &["-c", "etc1", "-s", "slow", "-aa"]);
        assert_eq!(
            Profile::Etc2.codec_args(),
            &["-c", "etc2", "-s", "slow", "-f", "RGBA"]
        );
    }

    #[test]
    fn test_sidecar_tag_lookup() {
        assert_eq!(Profile::from_sidecar_tag("6@1026"), Some(Profile::Etc1));
        assert_eq!(Profile::from_sidecar_tag("6@29"), Some(Profile::Etc2));
        assert_eq!(Profile::from_sidecar_tag("0"), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Profile::from_str("ETC2"), Some(Profile::Etc2));
        assert_eq!(Profile::from_str("astc"), None);
        assert_eq!(Profile::Etc1.to_string(), "etc1");
    }
}
