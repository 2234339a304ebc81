use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::asset::{read_metadata, AssetId, AssetLifecycle, AssetStatus, MetadataError};
use crate::config::PackagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReadyReason {
    Processing,
    MissingManifest,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::Processing => f.write_str("still processing"),
            NotReadyReason::MissingManifest => f.write_str("manifest missing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    #[error("asset {id} is not ready: {reason}")]
    AssetNotReady { id: AssetId, reason: NotReadyReason },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

#[derive(Debug, Clone, Serialize)]
pub struct AssetListing {
    pub id: AssetId,
    pub original_name: String,
    pub manifest_name: String,
    pub thumbnail: Option<String>,
    pub is_processing: bool,
    pub is_ready: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackTarget {
    pub id: AssetId,
    pub title: String,
    pub manifest_path: PathBuf,
}

/// Read side of the asset root: listings, status and playback lookups.
#[derive(Debug, Clone)]
pub struct Library {
    lifecycle: AssetLifecycle,
    thumbnail_name: String,
}

impl Library {
    pub fn new(lifecycle: AssetLifecycle, thumbnail_name: impl Into<String>) -> Self {
        Self {
            lifecycle,
            thumbnail_name: thumbnail_name.into(),
        }
    }

    pub fn from_config(lifecycle: AssetLifecycle, config: &PackagerConfig) -> Self {
        Self::new(lifecycle, config.thumbnail.file_name.clone())
    }

    pub fn lifecycle(&self) -> &AssetLifecycle {
        &self.lifecycle
    }

    /// Newest first. A missing asset root is an empty library.
    pub async fn list(&self) -> LibraryResult<Vec<AssetListing>> {
        let root = self.lifecycle.root();
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LibraryError::Io {
                    path: root.to_path_buf(),
                    source,
                })
            }
        };

        let mut listings = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| LibraryError::Io {
            path: root.to_path_buf(),
            source,
        })? {
            let path = entry.path();
            let Some(metadata) = directory_metadata(&path, entry.metadata().await)? else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = AssetId::parse(&name) else {
                debug!(entry = %name, "skipping entry that is not an asset id");
                continue;
            };

            let record = read_metadata(&path).await?;
            let thumbnail = path
                .join(&self.thumbnail_name)
                .is_file()
                .then(|| self.thumbnail_name.clone());
            listings.push(AssetListing {
                original_name: record.original_filename().to_string(),
                manifest_name: record.manifest_name().to_string(),
                thumbnail,
                is_processing: self.lifecycle.is_processing(&id),
                is_ready: self.lifecycle.is_ready(&id),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                id,
            });
        }

        listings.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listings)
    }

    /// Status of `raw_id`; ids that do not name a plain entry are absent.
    pub async fn status(&self, raw_id: &str) -> LibraryResult<AssetStatus> {
        let Some(id) = AssetId::parse(raw_id) else {
            return Ok(AssetStatus::absent());
        };
        let directory = self.lifecycle.directory(&id);
        if !directory.is_dir() {
            return Ok(AssetStatus::absent());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&directory)
            .await
            .map_err(|source| LibraryError::Io {
                path: directory.clone(),
                source,
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| LibraryError::Io {
            path: directory.clone(),
            source,
        })? {
            files.push(entry.file_name().to_string_lossy().to_string());
        }
        files.sort();

        Ok(AssetStatus {
            exists: true,
            is_processing: self.lifecycle.is_processing(&id),
            is_ready: self.lifecycle.is_ready(&id),
            files,
        })
    }

    /// Resolves the manifest named by the asset's record, or the configured
    /// one when the record names none usable.
    pub async fn resolve_playback(&self, raw_id: &str) -> LibraryResult<PlaybackTarget> {
        let id = AssetId::parse(raw_id)
            .filter(|id| self.lifecycle.exists(id))
            .ok_or_else(|| LibraryError::AssetNotFound(raw_id.to_string()))?;
        if self.lifecycle.is_processing(&id) {
            return Err(LibraryError::AssetNotReady {
                id,
                reason: NotReadyReason::Processing,
            });
        }

        let directory = self.lifecycle.directory(&id);
        let record = read_metadata(&directory).await?;
        let manifest_name = record
            .mpd
            .as_deref()
            .filter(|name| is_plain_file_name(name))
            .unwrap_or_else(|| self.lifecycle.manifest_name());
        let manifest_path = directory.join(manifest_name);
        if !manifest_path.is_file() {
            return Err(LibraryError::AssetNotReady {
                id,
                reason: NotReadyReason::MissingManifest,
            });
        }

        let title = record
            .original_filename
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.to_string());
        Ok(PlaybackTarget {
            manifest_path,
            title,
            id,
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Directory metadata for a listing entry. Entries removed mid-scan and
/// non-directories yield `None`.
fn directory_metadata(
    path: &Path,
    metadata: std::io::Result<std::fs::Metadata>,
) -> LibraryResult<Option<std::fs::Metadata>> {
    match metadata {
        Ok(metadata) if metadata.is_dir() => Ok(Some(metadata)),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "entry vanished during listing");
            Ok(None)
        }
        Err(source) => Err(LibraryError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{MetadataRecord, MARKER_FILE_NAME};
    use tempfile::TempDir;

    fn library(dir: &TempDir) -> Library {
        Library::new(AssetLifecycle::new(dir.path(), "output.mpd"), "thumbnail.jpg")
    }

    fn seed_ready(dir: &TempDir, id: &str, original: Option<&str>) {
        let asset = dir.path().join(id);
        std::fs::create_dir_all(&asset).unwrap();
        std::fs::write(asset.join("output.mpd"), "<MPD/>").unwrap();
        if let Some(original) = original {
            let record = MetadataRecord::new(original, "output.mpd");
            std::fs::write(asset.join("meta.txt"), record.render()).unwrap();
        }
    }

    #[tokio::test]
    async fn status_reports_files_and_readiness() {
        let dir = TempDir::new().unwrap();
        seed_ready(&dir, "clip", Some("Clip.mov"));
        let library = library(&dir);

        let status = library.status("clip").await.unwrap();
        assert!(status.exists);
        assert!(status.is_ready);
        assert!(!status.is_processing);
        assert_eq!(status.files, vec!["meta.txt", "output.mpd"]);

        assert_eq!(library.status("missing").await.unwrap(), AssetStatus::absent());
        assert_eq!(library.status("../clip").await.unwrap(), AssetStatus::absent());
    }

    #[tokio::test]
    async fn playback_requires_ready_asset() {
        let dir = TempDir::new().unwrap();
        seed_ready(&dir, "clip", Some("Clip.mov"));
        seed_ready(&dir, "bare", None);
        std::fs::create_dir_all(dir.path().join("busy")).unwrap();
        std::fs::write(dir.path().join("busy").join(MARKER_FILE_NAME), "processing").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let library = library(&dir);

        let target = library.resolve_playback("clip").await.unwrap();
        assert_eq!(target.title, "Clip.mov");
        assert_eq!(target.manifest_path, dir.path().join("clip").join("output.mpd"));
        assert_eq!(library.resolve_playback("bare").await.unwrap().title, "bare");

        assert!(matches!(
            library.resolve_playback("nope").await,
            Err(LibraryError::AssetNotFound(_))
        ));
        assert!(matches!(
            library.resolve_playback("busy").await,
            Err(LibraryError::AssetNotReady {
                reason: NotReadyReason::Processing,
                ..
            })
        ));
        assert!(matches!(
            library.resolve_playback("empty").await,
            Err(LibraryError::AssetNotReady {
                reason: NotReadyReason::MissingManifest,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn playback_follows_manifest_named_in_record() {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("clip");
        std::fs::create_dir_all(&asset).unwrap();
        std::fs::write(asset.join("stream.mpd"), "<MPD/>").unwrap();
        let record = MetadataRecord::new("Clip.mov", "stream.mpd");
        std::fs::write(asset.join("meta.txt"), record.render()).unwrap();
        let library = library(&dir);

        let listing = library.list().await.unwrap().remove(0);
        let target = library.resolve_playback("clip").await.unwrap();
        assert_eq!(listing.manifest_name, "stream.mpd");
        assert_eq!(target.manifest_path, asset.join("stream.mpd"));

        std::fs::remove_file(asset.join("stream.mpd")).unwrap();
        std::fs::write(asset.join("output.mpd"), "<MPD/>").unwrap();
        assert!(matches!(
            library.resolve_playback("clip").await,
            Err(LibraryError::AssetNotReady {
                reason: NotReadyReason::MissingManifest,
                ..
            })
        ));

        let escaping = MetadataRecord::new("Clip.mov", "../other/output.mpd");
        std::fs::write(asset.join("meta.txt"), escaping.render()).unwrap();
        let target = library.resolve_playback("clip").await.unwrap();
        assert_eq!(target.manifest_path, asset.join("output.mpd"));
    }

    #[test]
    fn vanished_entries_are_skipped_but_other_errors_surface() {
        let path = Path::new("/srv/videos/clip");
        let gone = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(directory_metadata(path, Err(gone)).unwrap().is_none());

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            directory_metadata(path, Err(denied)),
            Err(LibraryError::Io { .. })
        ));

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("stray.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(directory_metadata(&file, std::fs::metadata(&file)).unwrap().is_none());
        assert!(directory_metadata(dir.path(), std::fs::metadata(dir.path()))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn list_skips_files_and_reports_thumbnails() {
        let dir = TempDir::new().unwrap();
        seed_ready(&dir, "clip", Some("Clip.mov"));
        std::fs::write(dir.path().join("clip").join("thumbnail.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        let library = library(&dir);

        let listings = library.list().await.unwrap();
        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.id.as_str(), "clip");
        assert_eq!(listing.original_name, "Clip.mov");
        assert_eq!(listing.thumbnail.as_deref(), Some("thumbnail.jpg"));
        assert!(listing.is_ready);

        let empty = Library::new(
            AssetLifecycle::new(dir.path().join("nowhere"), "output.mpd"),
            "thumbnail.jpg",
        );
        assert!(empty.list().await.unwrap().is_empty());
    }
}
