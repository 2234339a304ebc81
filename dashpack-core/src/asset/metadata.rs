use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::DEFAULT_MANIFEST_NAME;

pub const METADATA_FILE_NAME: &str = "meta.txt";
pub const UNKNOWN_ORIGINAL_NAME: &str = "unknown";

const ORIGINAL_FILENAME_KEY: &str = "original_filename";
const MANIFEST_KEY: &str = "mpd";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Written,
    AlreadyPresent,
}

/// Per-asset `key=value` record. Missing keys resolve to defaults on access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    pub original_filename: Option<String>,
    pub mpd: Option<String>,
}

impl MetadataRecord {
    pub fn new(original_filename: impl Into<String>, manifest_name: impl Into<String>) -> Self {
        Self {
            original_filename: Some(original_filename.into()),
            mpd: Some(manifest_name.into()),
        }
    }

    pub fn parse(contents: &str) -> Self {
        let mut record = Self::default();
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                ORIGINAL_FILENAME_KEY => record.original_filename = Some(value),
                MANIFEST_KEY => record.mpd = Some(value),
                _ => {}
            }
        }
        record
    }

    pub fn render(&self) -> String {
        format!(
            "{ORIGINAL_FILENAME_KEY}={}\n{MANIFEST_KEY}={}\n",
            self.original_filename(),
            self.manifest_name()
        )
    }

    pub fn original_filename(&self) -> &str {
        self.original_filename
            .as_deref()
            .unwrap_or(UNKNOWN_ORIGINAL_NAME)
    }

    pub fn manifest_name(&self) -> &str {
        self.mpd.as_deref().unwrap_or(DEFAULT_MANIFEST_NAME)
    }
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE_NAME)
}

/// Reads the record in `dir`; an absent file is an empty record.
pub async fn read_metadata(dir: &Path) -> MetadataResult<MetadataRecord> {
    let path = metadata_path(dir);
    match fs::read_to_string(&path).await {
        Ok(contents) => Ok(MetadataRecord::parse(&contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(MetadataRecord::default()),
        Err(source) => Err(MetadataError::Io { source, path }),
    }
}

/// Writes the record only if none exists yet. Anything but a regular file
/// in its place is an error.
pub async fn finalize_metadata(
    dir: &Path,
    record: &MetadataRecord,
) -> MetadataResult<FinalizeOutcome> {
    let path = metadata_path(dir);
    let opened = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await;
    let mut file = match opened {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_file() => {
            return Ok(FinalizeOutcome::AlreadyPresent)
        }
        Err(source) => return Err(MetadataError::Io { source, path }),
    };
    file.write_all(record.render().as_bytes())
        .await
        .map_err(|source| MetadataError::Io {
            path: path.clone(),
            source,
        })?;
    file.flush()
        .await
        .map_err(|source| MetadataError::Io { path, source })?;
    Ok(FinalizeOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_known_keys() {
        let record = MetadataRecord::parse("original_filename=foo.mp4\nmpd=output.mpd\n");
        assert_eq!(record, MetadataRecord::new("foo.mp4", "output.mpd"));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let record = MetadataRecord::parse("original_filename=foo.mp4\n");
        assert_eq!(record.original_filename(), "foo.mp4");
        assert_eq!(record.manifest_name(), DEFAULT_MANIFEST_NAME);

        let empty = MetadataRecord::parse("");
        assert_eq!(empty.original_filename(), UNKNOWN_ORIGINAL_NAME);
    }

    #[test]
    fn skips_malformed_and_unknown_lines() {
        let record = MetadataRecord::parse(
            "garbage line\n title = ignored \nmpd = stream.mpd \noriginal_filename=a=b.mp4\n",
        );
        assert_eq!(record.manifest_name(), "stream.mpd");
        assert_eq!(record.original_filename(), "a=b.mp4");
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let record = MetadataRecord::new("foo.mp4", "output.mpd");
        let outcome = finalize_metadata(dir.path(), &record).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Written);

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        assert_eq!(raw, "original_filename=foo.mp4\nmpd=output.mpd\n");
        assert_eq!(read_metadata(dir.path()).await.unwrap(), record);
    }

    #[tokio::test]
    async fn finalize_is_write_once() {
        let dir = TempDir::new().unwrap();
        let first = MetadataRecord::new("first.mp4", "output.mpd");
        let second = MetadataRecord::new("second.mp4", "other.mpd");
        finalize_metadata(dir.path(), &first).await.unwrap();
        let outcome = finalize_metadata(dir.path(), &second).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::AlreadyPresent);

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        assert_eq!(raw, "original_filename=first.mp4\nmpd=output.mpd\n");
    }

    #[tokio::test]
    async fn directory_in_place_of_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let record = MetadataRecord::new("foo.mp4", "output.mpd");
        let err = finalize_metadata(dir.path(), &record).await.unwrap_err();
        assert!(matches!(err, MetadataError::Io { ref path, .. } if path.ends_with(METADATA_FILE_NAME)));
    }

    #[tokio::test]
    async fn absent_file_reads_as_empty_record() {
        let dir = TempDir::new().unwrap();
        let record = read_metadata(dir.path()).await.unwrap();
        assert_eq!(record, MetadataRecord::default());
        assert_eq!(record.manifest_name(), DEFAULT_MANIFEST_NAME);
    }
}
