use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::asset::{AssetId, LifecycleError};
use crate::command::CommandError;
use crate::error::ConfigError;

use super::types::Stage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("packaging failed: {0}")]
    Packaging(#[from] PackagingError),
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("invalid rendition ladder: {0}")]
    InvalidLadder(#[from] ConfigError),
    #[error("source file not found: {0}")]
    MissingSource(PathBuf),
    #[error("pipeline exceeded its deadline of {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("manifest {0} was not produced")]
    MissingManifest(PathBuf),
    #[error("manifest {path} is invalid: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },
    #[error("no media segments were written to {0}")]
    NoSegments(PathBuf),
}

/// Best-effort thumbnail capture failed; logged, never propagated.
#[derive(Debug, Error)]
#[error("thumbnail capture to {path} failed: {source}")]
pub struct ThumbnailFailure {
    pub path: PathBuf,
    #[source]
    pub source: CommandError,
}

/// A fatal ingestion failure, tagged with the stage that raised it.
#[derive(Debug, Error)]
#[error("ingestion of {asset_id} failed during {stage}: {source}")]
pub struct IngestError {
    pub asset_id: AssetId,
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl IngestError {
    pub fn new(asset_id: AssetId, stage: Stage, source: impl Into<PipelineError>) -> Self {
        Self {
            asset_id,
            stage,
            source: source.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
