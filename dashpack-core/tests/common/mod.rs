#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use dashpack_core::asset::AssetLifecycle;
use dashpack_core::command::CommandExecutor;
use dashpack_core::config::{load_packager_config, PackagerConfig};
use dashpack_core::pipeline::IngestPipeline;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

#[cfg(unix)]
pub fn exit_code(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_code(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code as u32)
}

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

pub fn load_config(base: &TempDir) -> PackagerConfig {
    let mut config = load_packager_config(fixture_path("configs/dashpack.toml")).unwrap();
    config.paths.uploads_dir = base.path().join("uploads");
    config.paths.assets_dir = base.path().join("videos");
    config
}

pub fn write_source(base: &TempDir, name: &str) -> PathBuf {
    let path = base.path().join(name);
    std::fs::write(&path, b"source media").unwrap();
    path
}

/// Stands in for ffmpeg: writes whatever file the last argument names.
///
/// Packaging calls (`-f dash`) write a manifest with one adaptation set for
/// the video inputs and one for the audio inputs, plus init and media segments.
#[derive(Default)]
pub struct FakeFfmpeg {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on: Mutex<Option<String>>,
    delay: Option<Duration>,
    single_adaptation_set: bool,
    skip_segments: bool,
    block_metadata: bool,
}

impl FakeFfmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call whose joined arguments contain `needle`.
    pub fn failing_on(needle: &str) -> Self {
        let fake = Self::default();
        *fake.fail_on.lock().unwrap() = Some(needle.to_string());
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_single_adaptation_set(mut self) -> Self {
        self.single_adaptation_set = true;
        self
    }

    pub fn without_segments(mut self) -> Self {
        self.skip_segments = true;
        self
    }

    /// Leaves a directory where the metadata record would be written.
    pub fn blocking_metadata(mut self) -> Self {
        self.block_metadata = true;
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn write_dash(&self, args: &[String], manifest: &Path) -> std::io::Result<()> {
        let video = args.iter().filter(|arg| arg.ends_with(":v")).count();
        let audio = args.iter().filter(|arg| arg.ends_with(":a")).count();
        let dir = manifest.parent().unwrap();

        let representations = |range: std::ops::Range<usize>| {
            range
                .map(|id| format!("      <Representation id=\"{id}\" mimeType=\"video/mp4\"/>\n"))
                .collect::<String>()
        };
        let mut body = format!(
            "    <AdaptationSet id=\"0\" contentType=\"video\">\n{}    </AdaptationSet>\n",
            representations(0..video)
        );
        if !self.single_adaptation_set {
            body.push_str(&format!(
                "    <AdaptationSet id=\"1\" contentType=\"audio\">\n{}    </AdaptationSet>\n",
                representations(video..video + audio)
            ));
        }
        let mpd = format!(
            "<?xml version=\"1.0\"?>\n<MPD type=\"static\">\n  <Period id=\"0\">\n{body}  </Period>\n</MPD>\n"
        );
        std::fs::write(manifest, mpd)?;

        if self.block_metadata {
            std::fs::create_dir_all(dir.join("meta.txt"))?;
        }
        if !self.skip_segments {
            for id in 0..video + audio {
                std::fs::write(dir.join(format!("init-{id}.m4s")), b"init")?;
                std::fs::write(dir.join(format!("chunk-{id}-00001.m4s")), b"chunk")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for FakeFfmpeg {
    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let joined = args.join(" ");
        let should_fail = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .map(|needle| joined.contains(needle))
            .unwrap_or(false);
        if should_fail {
            return Ok(Output {
                status: exit_code(1),
                stdout: Vec::new(),
                stderr: b"Conversion failed!".to_vec(),
            });
        }

        let output = PathBuf::from(args.last().cloned().unwrap_or_default());
        if joined.contains("-f dash") {
            self.write_dash(args, &output)?;
        } else {
            std::fs::write(&output, b"encoded")?;
        }
        Ok(Output {
            status: exit_code(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

pub fn build_pipeline(config: PackagerConfig, fake: Arc<FakeFfmpeg>) -> IngestPipeline {
    let lifecycle = AssetLifecycle::from_config(&config);
    IngestPipeline::new(
        Arc::new(config),
        lifecycle,
        Some(fake as Arc<dyn CommandExecutor>),
    )
    .unwrap()
}
