pub mod lifecycle;
pub mod metadata;

use std::fmt;
use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::upload::sanitize_file_name;

pub use lifecycle::{AssetClaim, AssetLifecycle, LifecycleError, LifecycleResult, ProcessingMarker};
pub use metadata::{
    finalize_metadata, read_metadata, FinalizeOutcome, MetadataError, MetadataRecord,
    MetadataResult, METADATA_FILE_NAME, UNKNOWN_ORIGINAL_NAME,
};

pub const MARKER_FILE_NAME: &str = ".processing";

/// Directory-safe asset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Accepts an id only if it names a single plain directory entry.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        valid.then(|| Self(raw.to_string()))
    }

    /// Uses the sanitized file stem, or a generated token when nothing survives.
    pub fn from_source_name(name: &str) -> Self {
        let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
        Path::new(base)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(sanitize_file_name)
            .and_then(|stem| Self::parse(&stem))
            .unwrap_or_else(Self::generate)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Absent,
    Processing,
    Ready,
    /// Directory without a marker or a manifest.
    Incomplete,
}

impl AssetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetState::Absent => "absent",
            AssetState::Processing => "processing",
            AssetState::Ready => "ready",
            AssetState::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only projection of an asset's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetStatus {
    pub exists: bool,
    pub is_processing: bool,
    pub is_ready: bool,
    pub files: Vec<String>,
}

impl AssetStatus {
    pub fn absent() -> Self {
        Self {
            exists: false,
            is_processing: false,
            is_ready: false,
            files: Vec::new(),
        }
    }

    pub fn state(&self) -> AssetState {
        if !self.exists {
            AssetState::Absent
        } else if self.is_processing {
            AssetState::Processing
        } else if self.is_ready {
            AssetState::Ready
        } else {
            AssetState::Incomplete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_comes_from_sanitized_stem() {
        assert_eq!(AssetId::from_source_name("My Holiday.mp4").as_str(), "My_Holiday");
        assert_eq!(AssetId::from_source_name("../../etc/clip.mov").as_str(), "clip");
    }

    #[test]
    fn unusable_name_gets_generated_token() {
        let id = AssetId::from_source_name("???.mp4");
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parse_rejects_traversal() {
        assert!(AssetId::parse("..").is_none());
        assert!(AssetId::parse("a/b").is_none());
        assert!(AssetId::parse(".processing").is_none());
        assert!(AssetId::parse("").is_none());
        assert_eq!(AssetId::parse("clip-01").unwrap().as_str(), "clip-01");
    }

    #[test]
    fn status_serializes_with_flat_flags() {
        let status = AssetStatus {
            exists: true,
            is_processing: false,
            is_ready: true,
            files: vec!["output.mpd".into()],
        };
        assert_eq!(status.state(), AssetState::Ready);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "exists": true,
                "is_processing": false,
                "is_ready": true,
                "files": ["output.mpd"],
            })
        );
        assert_eq!(AssetStatus::absent().state(), AssetState::Absent);
    }

    #[test]
    fn directory_without_marker_or_manifest_is_incomplete() {
        let status = AssetStatus {
            exists: true,
            is_processing: false,
            is_ready: false,
            files: Vec::new(),
        };
        assert_eq!(status.state(), AssetState::Incomplete);
        assert_eq!(status.state().to_string(), "incomplete");

        let busy = AssetStatus {
            is_processing: true,
            ..status
        };
        assert_eq!(busy.state(), AssetState::Processing);
    }
}
