use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::config::PackagingSection;

use super::error::{PackagingError, PipelineError, PipelineResult};
use super::manifest::ManifestSummary;
use super::types::{EncodedRenditions, PackagedManifest};

/// Remuxes encoded renditions into one segmented DASH package.
#[derive(Debug, Clone)]
pub struct ManifestPackager {
    runner: CommandRunner,
    packaging: PackagingSection,
    log_level: String,
}

impl ManifestPackager {
    pub fn new(runner: CommandRunner, packaging: PackagingSection, log_level: impl Into<String>) -> Self {
        Self {
            runner,
            packaging,
            log_level: log_level.into(),
        }
    }

    pub fn manifest_name(&self) -> &str {
        &self.packaging.manifest_name
    }

    pub async fn package(
        &self,
        renditions: &EncodedRenditions,
        dest: &Path,
    ) -> PipelineResult<PackagedManifest> {
        let manifest_path = dest.join(&self.packaging.manifest_name);
        let args = self.dash_args(renditions, &manifest_path);
        self.runner.run(&args).await?;

        let manifest = self.verify(&manifest_path, renditions).await?;
        let segments = self.collect_segments(dest).await?;
        if segments.is_empty() {
            return Err(PackagingError::NoSegments(dest.to_path_buf()).into());
        }
        info!(
            manifest = %manifest_path.display(),
            adaptation_sets = manifest.adaptation_sets.len(),
            segments = segments.len(),
            "dash package written"
        );

        if !self.packaging.keep_intermediates {
            remove_intermediates(renditions).await;
        }

        Ok(PackagedManifest {
            manifest_path,
            adaptation_sets: manifest.adaptation_sets,
            segments,
        })
    }

    /// Video inputs come first so their stream indices form the first adaptation set.
    pub fn dash_args(&self, renditions: &EncodedRenditions, manifest: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
        ];
        for path in renditions.paths() {
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        let video_count = renditions.video.len();
        let audio_count = renditions.audio.len();
        for index in 0..video_count {
            args.push("-map".to_string());
            args.push(format!("{index}:v"));
        }
        for index in video_count..video_count + audio_count {
            args.push("-map".to_string());
            args.push(format!("{index}:a"));
        }

        let video_streams = join_indices(0..video_count);
        let audio_streams = join_indices(video_count..video_count + audio_count);
        args.extend([
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "dash".to_string(),
            "-seg_duration".to_string(),
            self.packaging.segment_duration_seconds.to_string(),
            "-use_timeline".to_string(),
            flag(self.packaging.use_timeline),
            "-use_template".to_string(),
            flag(self.packaging.use_template),
            "-init_seg_name".to_string(),
            self.packaging.init_segment_name.clone(),
            "-media_seg_name".to_string(),
            self.packaging.media_segment_name.clone(),
            "-adaptation_sets".to_string(),
            format!("id=0,streams={video_streams} id=1,streams={audio_streams}"),
            manifest.to_string_lossy().to_string(),
        ]);
        args
    }

    async fn verify(
        &self,
        manifest_path: &Path,
        renditions: &EncodedRenditions,
    ) -> PipelineResult<ManifestSummary> {
        if !manifest_path.is_file() {
            return Err(PackagingError::MissingManifest(manifest_path.to_path_buf()).into());
        }
        let contents = fs::read_to_string(manifest_path)
            .await
            .map_err(|source| PipelineError::Io {
                path: manifest_path.to_path_buf(),
                source,
            })?;
        let summary = ManifestSummary::parse(&contents);
        summary
            .check(renditions.video.len(), renditions.audio.len())
            .map_err(|reason| PackagingError::InvalidManifest {
                path: manifest_path.to_path_buf(),
                reason,
            })?;
        Ok(summary)
    }

    async fn collect_segments(&self, dest: &Path) -> PipelineResult<Vec<PathBuf>> {
        let prefix = template_prefix(&self.packaging.media_segment_name);
        let mut entries = fs::read_dir(dest)
            .await
            .map_err(|source| PipelineError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        let mut segments = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PipelineError::Io {
                path: dest.to_path_buf(),
                source,
            })?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let matches = if prefix.is_empty() {
                name.ends_with(".m4s")
            } else {
                name.starts_with(prefix)
            };
            if matches {
                segments.push(entry.path());
            }
        }
        segments.sort();
        Ok(segments)
    }
}

async fn remove_intermediates(renditions: &EncodedRenditions) {
    for path in renditions.paths() {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "intermediate removed"),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to remove intermediate rendition")
            }
        }
    }
}

/// Literal text before the first `$` template identifier.
fn template_prefix(template: &str) -> &str {
    template.split('$').next().unwrap_or_default()
}

fn join_indices(range: std::ops::Range<usize>) -> String {
    range
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}
