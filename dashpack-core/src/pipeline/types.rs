use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::asset::AssetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Claim,
    Encode,
    Package,
    Publish,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claim => "claim",
            Stage::Encode => "encode",
            Stage::Package => "package",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenditionKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionFile {
    pub name: String,
    pub kind: RenditionKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct EncodedRenditions {
    /// Lowest to highest resolution.
    pub video: Vec<RenditionFile>,
    pub audio: Vec<RenditionFile>,
    pub thumbnail: Option<PathBuf>,
}

impl EncodedRenditions {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .map(|rendition| rendition.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.video.len() + self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdaptationSetSummary {
    pub id: Option<String>,
    pub content_type: Option<String>,
    pub representations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PackagedManifest {
    pub manifest_path: PathBuf,
    pub adaptation_sets: Vec<AdaptationSetSummary>,
    pub segments: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub asset_id: AssetId,
    pub source_path: PathBuf,
    pub source_name: String,
}

impl IngestRequest {
    pub fn new(
        asset_id: AssetId,
        source_path: impl Into<PathBuf>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            asset_id,
            source_path: source_path.into(),
            source_name: source_name.into(),
        }
    }
}

impl From<crate::upload::StagedUpload> for IngestRequest {
    fn from(upload: crate::upload::StagedUpload) -> Self {
        Self {
            asset_id: upload.asset_id,
            source_path: upload.path,
            source_name: upload.source_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub asset_id: AssetId,
    pub manifest_path: PathBuf,
    pub renditions: usize,
    pub adaptation_sets: Vec<AdaptationSetSummary>,
    pub segments: usize,
    pub thumbnail: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
