//! Sidecar descriptor model
//!
//! Descriptors are JSON arrays written by the Cocos build. Element 5 is an
//! array whose first string starts with the texture storage tag, e.g.
//! `"0,9729,9729,33071,33071,0,0,1"`. Only that leading tag is rewritten;
//! the rest of the document is carried through untouched.

use serde_json::Value;
use std::fmt;

use crate::profile::Profile;

const TEXTURE_INFO_INDEX: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Descriptor has {0} elements, expected at least 6")]
    TooShort(usize),

    #[error("Descriptor element 5 is not an array with a leading string")]
    MissingTextureInfo,
}

/// Storage tag at the head of the texture info string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionTag {
    /// `0,`: plain image
    Raw,
    /// `1,`: alternate uncompressed layout
    Alternate,
    /// Already pointing at a compressed artifact
    Converted(Profile),
    Unknown(String),
}

impl CompressionTag {
    fn parse(tag: &str) -> Self {
        match tag {
            "0" => CompressionTag::Raw,
            "1" => CompressionTag::Alternate,
            other => match Profile::from_sidecar_tag(other) {
                Some(profile) => CompressionTag::Converted(profile),
                None => CompressionTag::Unknown(other.to_string()),
            },
        }
    }

    /// Whether the texture can still be converted
    pub fn is_uncompressed(&self) -> bool {
        matches!(self, CompressionTag::Raw | CompressionTag::Alternate)
    }
}

impl fmt::Display for CompressionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionTag::Raw => f.write_str("0"),
            CompressionTag::Alternate => f.write_str("1"),
            CompressionTag::Converted(profile) => f.write_str(profile.sidecar_tag()),
            CompressionTag::Unknown(tag) => f.write_str(tag),
        }
    }
}

/// Parsed sidecar descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarDescriptor {
    entries: Vec<Value>,
}

impl SidecarDescriptor {
    pub fn parse(content: &str) -> Result<Self, DescriptorError> {
        let entries: Vec<Value> = serde_json::from_str(content)?;
        if entries.len() <= TEXTURE_INFO_INDEX {
            return Err(DescriptorError::TooShort(entries.len()));
        }

        let descriptor = Self { entries };
        descriptor.texture_info()?;
        Ok(descriptor)
    }

    fn texture_info(&self) -> Result<&str, DescriptorError> {
        self.entries[TEXTURE_INFO_INDEX]
            .get(0)
            .and_then(Value::as_str)
            .ok_or(DescriptorError::MissingTextureInfo)
    }

    /// Current storage tag
    pub fn compression_tag(&self) -> Result<CompressionTag, DescriptorError> {
        let info = self.texture_info()?;
        Ok(match info.split_once(',') {
            Some((tag, _)) => CompressionTag::parse(tag),
            None => CompressionTag::Unknown(info.to_string()),
        })
    }

    /// Replace the leading tag with the profile's tag, keeping the remainder
    pub fn set_compression_tag(&mut self, profile: Profile) -> Result<(), DescriptorError> {
        let info = self.texture_info()?;
        let rest = info.split_once(',').map(|(_, rest)| rest).unwrap_or_default();
        let patched = format!("{},{}", profile.sidecar_tag(), rest);

        self.entries[TEXTURE_INFO_INDEX][0] = Value::String(patched);
        Ok(())
    }

    /// Pretty-printed with two-space indentation
    pub fn to_pretty_string(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }
}
