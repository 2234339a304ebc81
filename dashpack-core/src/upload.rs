use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::asset::AssetId;
use crate::config::PackagerConfig;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload has no file name")]
    EmptyName,
    #[error("extension not allowed: {name}")]
    ExtensionNotAllowed { name: String },
    #[error("upload source not found: {0}")]
    MissingSource(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Reduces an uploaded name to a safe single file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    cleaned.trim_matches(|c: char| c == '.' || c == '_').to_string()
}

pub fn has_allowed_extension(name: &str, allowed: &[String]) -> bool {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };
    allowed
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(extension))
}

/// An upload copied into the uploads directory, ready for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub asset_id: AssetId,
    pub source_name: String,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadIntake {
    uploads_dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadIntake {
    pub fn new(uploads_dir: impl Into<PathBuf>, allowed_extensions: Vec<String>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            allowed_extensions,
        }
    }

    pub fn from_config(config: &PackagerConfig) -> Self {
        Self::new(
            config.paths.uploads_dir.clone(),
            config.ingest.allowed_extensions.clone(),
        )
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Validates `display_name` (or the source's own name) and copies the file in.
    pub async fn accept(
        &self,
        source: &Path,
        display_name: Option<&str>,
    ) -> UploadResult<StagedUpload> {
        let given = match display_name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let source_name = given
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        if source_name.is_empty() {
            return Err(UploadError::EmptyName);
        }
        let file_name = sanitize_file_name(&source_name);
        if file_name.is_empty() || !has_allowed_extension(&file_name, &self.allowed_extensions) {
            return Err(UploadError::ExtensionNotAllowed { name: source_name });
        }
        if !source.is_file() {
            return Err(UploadError::MissingSource(source.to_path_buf()));
        }

        fs::create_dir_all(&self.uploads_dir)
            .await
            .map_err(|source| UploadError::Io {
                path: self.uploads_dir.clone(),
                source,
            })?;
        let path = self.uploads_dir.join(&file_name);
        if !same_file(source, &path).await {
            fs::copy(source, &path)
                .await
                .map_err(|source| UploadError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        let asset_id = AssetId::from_source_name(&file_name);
        info!(asset_id = %asset_id, path = %path.display(), "upload accepted");
        Ok(StagedUpload {
            asset_id,
            source_name,
            file_name,
            path,
        })
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
