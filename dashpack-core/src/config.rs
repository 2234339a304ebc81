use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_MANIFEST_NAME: &str = "output.mpd";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PackagerConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub tools: ToolsSection,
    pub ladder: LadderSection,
    #[serde(default)]
    pub packaging: PackagingSection,
    #[serde(default)]
    pub thumbnail: ThumbnailSection,
    #[serde(default)]
    pub ingest: IngestSection,
}

impl PackagerConfig {
    /// Rebases relative `paths` entries onto `base`.
    pub fn resolve_paths<P: AsRef<Path>>(&mut self, base: P) {
        let base = base.as_ref();
        for path in [&mut self.paths.uploads_dir, &mut self.paths.assets_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if self.tools.ffmpeg.components().count() > 1 && self.tools.ffmpeg.is_relative() {
            self.tools.ffmpeg = base.join(&self.tools.ffmpeg);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ladder.validate()?;
        if self.packaging.segment_duration_seconds == 0 {
            return Err(ConfigError::Invalid(
                "packaging.segment_duration_seconds must be greater than zero".into(),
            ));
        }
        if self.packaging.manifest_name.trim().is_empty()
            || self.packaging.manifest_name.contains(['/', '\\'])
        {
            return Err(ConfigError::Invalid(format!(
                "packaging.manifest_name is not a plain file name: {:?}",
                self.packaging.manifest_name
            )));
        }
        if self.ingest.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.allowed_extensions must not be empty".into(),
            ));
        }
        if self.ingest.stale_marker_seconds == 0 {
            return Err(ConfigError::Invalid(
                "ingest.stale_marker_seconds must be greater than zero".into(),
            ));
        }
        if self.ingest.timeout_seconds == Some(0) {
            return Err(ConfigError::Invalid(
                "ingest.timeout_seconds must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub uploads_dir: PathBuf,
    pub assets_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub ffmpeg: PathBuf,
    pub log_level: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            log_level: "error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LadderSection {
    #[serde(default = "default_display_aspect")]
    pub display_aspect: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    pub video: Vec<VideoRung>,
    pub audio: Vec<AudioRung>,
}

impl LadderSection {
    /// Video rungs ordered from the lowest to the highest resolution.
    pub fn sorted_video(&self) -> Vec<VideoRung> {
        let mut rungs = self.video.clone();
        rungs.sort_by_key(|rung| rung.pixels());
        rungs
    }

    pub fn validate(&self) -> Result<()> {
        if self.video.is_empty() {
            return Err(ConfigError::Invalid(
                "ladder needs at least one video rung".into(),
            ));
        }
        if self.audio.is_empty() {
            return Err(ConfigError::Invalid(
                "ladder needs at least one audio rung".into(),
            ));
        }
        let mut names = HashSet::new();
        for rung in &self.video {
            if rung.width == 0 || rung.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "video rung {} has a zero dimension",
                    rung.name
                )));
            }
            check_rung_name(&rung.name, &mut names)?;
        }
        let mut names = HashSet::new();
        for rung in &self.audio {
            if rung.channels == 0 {
                return Err(ConfigError::Invalid(format!(
                    "audio rung {} has zero channels",
                    rung.name
                )));
            }
            check_rung_name(&rung.name, &mut names)?;
        }
        let sorted = self.sorted_video();
        for pair in sorted.windows(2) {
            if pair[1].crf > pair[0].crf {
                return Err(ConfigError::Invalid(format!(
                    "video rung {} uses crf {} above the smaller rung {} (crf {})",
                    pair[1].name, pair[1].crf, pair[0].name, pair[0].crf
                )));
            }
        }
        Ok(())
    }
}

fn check_rung_name(name: &str, seen: &mut HashSet<String>) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ConfigError::Invalid(format!("invalid rung name {name:?}")));
    }
    if !seen.insert(name.to_string()) {
        return Err(ConfigError::Invalid(format!("duplicate rung name {name}")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoRung {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub crf: u8,
}

impl VideoRung {
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn file_name(&self) -> String {
        format!("video_{}_dash.mp4", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudioRung {
    pub name: String,
    pub channels: u8,
    pub bitrate: String,
}

impl AudioRung {
    pub fn file_name(&self) -> String {
        format!("audio_{}.m4a", self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackagingSection {
    pub segment_duration_seconds: u32,
    pub manifest_name: String,
    pub use_timeline: bool,
    pub use_template: bool,
    pub init_segment_name: String,
    pub media_segment_name: String,
    pub keep_intermediates: bool,
}

impl Default for PackagingSection {
    fn default() -> Self {
        Self {
            segment_duration_seconds: 3,
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            use_timeline: true,
            use_template: true,
            init_segment_name: "init-$RepresentationID$.m4s".to_string(),
            media_segment_name: "chunk-$RepresentationID$-$Number%05d$.m4s".to_string(),
            keep_intermediates: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailSection {
    pub enabled: bool,
    pub offset_seconds: u32,
    pub quality: u8,
    pub file_name: String,
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            enabled: true,
            offset_seconds: 1,
            quality: 2,
            file_name: "thumbnail.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub allowed_extensions: Vec<String>,
    pub replace_existing: bool,
    pub timeout_seconds: Option<u64>,
    /// Age after which a processing marker counts as abandoned.
    pub stale_marker_seconds: u64,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            allowed_extensions: ["mp4", "mov", "mkv", "webm", "avi"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            replace_existing: false,
            timeout_seconds: None,
            stale_marker_seconds: 6 * 60 * 60,
        }
    }
}

fn default_display_aspect() -> String {
    "16/9".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

/// Loads, rebases and validates a packager config file.
pub fn load_packager_config<P: AsRef<Path>>(path: P) -> Result<PackagerConfig> {
    let path = path.as_ref();
    let mut config = parse_packager_config(path)?;
    if let Some(parent) = path.parent() {
        config.resolve_paths(parent);
    }
    config.validate()?;
    Ok(config)
}

fn parse_packager_config(path: &Path) -> Result<PackagerConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
