use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::config::{AudioRung, LadderSection, ThumbnailSection, VideoRung};

use super::error::{PipelineError, PipelineResult, ThumbnailFailure};
use super::types::{EncodedRenditions, RenditionFile, RenditionKind};

const PARTIAL_PREFIX: &str = ".partial-";

/// Encodes the configured ladder into independent elementary-stream files.
#[derive(Debug, Clone)]
pub struct RenditionEncoder {
    runner: CommandRunner,
    ladder: LadderSection,
    thumbnail: ThumbnailSection,
    log_level: String,
}

impl RenditionEncoder {
    pub fn new(
        runner: CommandRunner,
        ladder: LadderSection,
        thumbnail: ThumbnailSection,
        log_level: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            ladder,
            thumbnail,
            log_level: log_level.into(),
        }
    }

    pub async fn encode(&self, source: &Path, dest: &Path) -> PipelineResult<EncodedRenditions> {
        fs::create_dir_all(dest)
            .await
            .map_err(|source| PipelineError::Io {
                path: dest.to_path_buf(),
                source,
            })?;

        let mut encoded = EncodedRenditions::default();
        if self.thumbnail.enabled {
            match self.capture_thumbnail(source, dest).await {
                Ok(path) => encoded.thumbnail = Some(path),
                Err(failure) => {
                    warn!(error = %failure, "thumbnail capture failed; continuing without it")
                }
            }
        }

        for rung in self.ladder.sorted_video() {
            let output = dest.join(rung.file_name());
            self.encode_one(&output, |partial| self.video_args(source, &rung, partial))
                .await?;
            info!(
                rendition = %rung.name,
                width = rung.width,
                height = rung.height,
                "video rendition encoded"
            );
            encoded.video.push(RenditionFile {
                name: rung.name.clone(),
                kind: RenditionKind::Video,
                path: output,
            });
        }

        for rung in &self.ladder.audio {
            let output = dest.join(rung.file_name());
            self.encode_one(&output, |partial| self.audio_args(source, rung, partial))
                .await?;
            info!(rendition = %rung.name, channels = rung.channels, "audio rendition encoded");
            encoded.audio.push(RenditionFile {
                name: rung.name.clone(),
                kind: RenditionKind::Audio,
                path: output,
            });
        }

        Ok(encoded)
    }

    /// Runs the tool against a partial path and renames it into place on success.
    async fn encode_one<F>(&self, output: &Path, build_args: F) -> PipelineResult<()>
    where
        F: FnOnce(&Path) -> Vec<String>,
    {
        let partial = partial_path(output);
        let args = build_args(&partial);
        if let Err(err) = self.runner.run(&args).await {
            discard(&partial).await;
            return Err(err.into());
        }
        fs::rename(&partial, output)
            .await
            .map_err(|source| PipelineError::Io {
                path: output.to_path_buf(),
                source,
            })
    }

    async fn capture_thumbnail(
        &self,
        source: &Path,
        dest: &Path,
    ) -> Result<PathBuf, ThumbnailFailure> {
        let path = dest.join(&self.thumbnail.file_name);
        let args = self.thumbnail_args(source, &path);
        match self.runner.run(&args).await {
            Ok(_) => {
                debug!(path = %path.display(), "thumbnail captured");
                Ok(path)
            }
            Err(err) => {
                discard(&path).await;
                Err(ThumbnailFailure { path, source: err })
            }
        }
    }

    fn base_args(&self, source: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
        ]
    }

    pub fn video_args(&self, source: &Path, rung: &VideoRung, output: &Path) -> Vec<String> {
        let mut args = self.base_args(source);
        args.extend([
            "-vf".to_string(),
            format!(
                "scale={}:{},setsar=1,setdar={}",
                rung.width, rung.height, self.ladder.display_aspect
            ),
            "-c:v".to_string(),
            self.ladder.video_codec.clone(),
            "-crf".to_string(),
            rung.crf.to_string(),
            "-preset".to_string(),
            self.ladder.preset.clone(),
            "-an".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    pub fn audio_args(&self, source: &Path, rung: &AudioRung, output: &Path) -> Vec<String> {
        let mut args = self.base_args(source);
        args.extend([
            "-vn".to_string(),
            "-c:a".to_string(),
            self.ladder.audio_codec.clone(),
            "-b:a".to_string(),
            rung.bitrate.clone(),
            "-ac".to_string(),
            rung.channels.to_string(),
            "-f".to_string(),
            "ipod".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    pub fn thumbnail_args(&self, source: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-ss".to_string(),
            format_offset(self.thumbnail.offset_seconds),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            self.thumbnail.quality.to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    output.with_file_name(format!("{PARTIAL_PREFIX}{name}"))
}

async fn discard(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %error, "failed to remove partial output");
        }
    }
}

fn format_offset(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    )
}
