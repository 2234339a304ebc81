mod encoder;
mod error;
mod manifest;
mod packager;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::asset::{AssetLifecycle, FinalizeOutcome, MetadataRecord};
use crate::command::{CommandExecutor, CommandRunner};
use crate::config::PackagerConfig;

pub use encoder::RenditionEncoder;
pub use error::{IngestError, PackagingError, PipelineError, PipelineResult, ThumbnailFailure};
pub use manifest::ManifestSummary;
pub use packager::ManifestPackager;
pub use types::{
    AdaptationSetSummary, EncodedRenditions, IngestReport, IngestRequest, PackagedManifest,
    RenditionFile, RenditionKind, Stage,
};

/// Drives one source through claim, encode, package and publish.
///
/// Any failure after the claim rolls the asset directory back, so an id is
/// either absent, processing or ready.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    config: Arc<PackagerConfig>,
    lifecycle: AssetLifecycle,
    encoder: RenditionEncoder,
    packager: ManifestPackager,
    timeout: Option<Duration>,
}

impl IngestPipeline {
    pub fn new(
        config: Arc<PackagerConfig>,
        lifecycle: AssetLifecycle,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let runner = CommandRunner::new(config.tools.ffmpeg.clone(), executor);
        let encoder = RenditionEncoder::new(
            runner.clone(),
            config.ladder.clone(),
            config.thumbnail.clone(),
            config.tools.log_level.clone(),
        );
        let packager = ManifestPackager::new(
            runner,
            config.packaging.clone(),
            config.tools.log_level.clone(),
        );
        let timeout = config.ingest.timeout_seconds.map(Duration::from_secs);
        Ok(Self {
            config,
            lifecycle,
            encoder,
            packager,
            timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &AssetLifecycle {
        &self.lifecycle
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestError> {
        let started_at = Utc::now();
        let asset_id = request.asset_id.clone();
        if !request.source_path.is_file() {
            return Err(IngestError::new(
                asset_id,
                Stage::Claim,
                PipelineError::MissingSource(request.source_path.clone()),
            ));
        }

        let mut claim = self
            .lifecycle
            .begin(&asset_id)
            .await
            .map_err(|err| IngestError::new(asset_id.clone(), Stage::Claim, err))?;
        let directory = claim.directory().to_path_buf();

        let mut stage = Stage::Encode;
        let outcome = match self.timeout {
            Some(limit) => {
                let deadline = tokio::time::timeout(
                    limit,
                    self.build(&request.source_path, &directory, &mut stage),
                )
                .await;
                deadline.unwrap_or(Err(PipelineError::TimedOut(limit)))
            }
            None => {
                self.build(&request.source_path, &directory, &mut stage)
                    .await
            }
        };

        let (encoded, packaged) = match outcome {
            Ok(built) => built,
            Err(err) => {
                error!(asset_id = %asset_id, stage = %stage, error = %err, "ingestion failed");
                warn!(asset_id = %asset_id, stage = %Stage::Cleanup, "rolling back asset");
                claim.rollback().await;
                return Err(IngestError::new(asset_id, stage, err));
            }
        };

        let record = MetadataRecord::new(request.source_name.clone(), self.packager.manifest_name());
        match claim.publish(&record).await {
            Ok(FinalizeOutcome::Written) => {}
            Ok(FinalizeOutcome::AlreadyPresent) => {
                warn!(asset_id = %asset_id, "metadata already present; left untouched")
            }
            Err(err) => {
                error!(asset_id = %asset_id, stage = %Stage::Publish, error = %err, "publish failed");
                claim.rollback().await;
                return Err(IngestError::new(asset_id, Stage::Publish, err));
            }
        }
        drop(claim);

        info!(
            asset_id = %asset_id,
            renditions = encoded.len(),
            segments = packaged.segments.len(),
            "asset ready"
        );
        Ok(IngestReport {
            asset_id,
            manifest_path: packaged.manifest_path,
            renditions: encoded.len(),
            adaptation_sets: packaged.adaptation_sets,
            segments: packaged.segments.len(),
            thumbnail: encoded.thumbnail,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn build(
        &self,
        source: &Path,
        directory: &Path,
        stage: &mut Stage,
    ) -> PipelineResult<(EncodedRenditions, PackagedManifest)> {
        *stage = Stage::Encode;
        let encoded = self.encoder.encode(source, directory).await?;
        *stage = Stage::Package;
        let packaged = self.packager.package(&encoded, directory).await?;
        Ok((encoded, packaged))
    }
}
