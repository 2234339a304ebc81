use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PackagerConfig;

use super::metadata::{finalize_metadata, FinalizeOutcome, MetadataError, MetadataRecord};
use super::{AssetId, AssetState, MARKER_FILE_NAME};

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("asset {0} is already being processed")]
    AlreadyProcessing(AssetId),
    #[error("asset {0} already exists")]
    AlreadyExists(AssetId),
    #[error("claim on asset {0} was taken over by another run")]
    ClaimLost(AssetId),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

type ClaimTable = Arc<Mutex<HashMap<AssetId, Uuid>>>;

/// Contents of the processing marker: which run owns the directory, and since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingMarker {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub token: Uuid,
}

impl ProcessingMarker {
    pub fn new(token: Uuid) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            token,
        }
    }

    pub fn parse(contents: &str) -> Option<Self> {
        let mut pid = None;
        let mut started_at = None;
        let mut token = None;
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "pid" => pid = value.parse().ok(),
                "started_at" => {
                    started_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|at| at.with_timezone(&Utc))
                }
                "token" => token = Uuid::parse_str(value).ok(),
                _ => {}
            }
        }
        Some(Self {
            pid: pid?,
            started_at: started_at?,
            token: token?,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "pid={}\nstarted_at={}\ntoken={}\n",
            self.pid,
            self.started_at.to_rfc3339(),
            self.token
        )
    }
}

enum MarkerTake {
    Fresh,
    Taken(Option<ProcessingMarker>),
    Missing,
}

/// Owns the asset root and the table of in-flight ingestions.
///
/// The marker file is the claim: it is created exclusively, so only one run
/// in any process can hold it. The table only short-circuits claims made
/// through this instance. A marker is treated as abandoned once it is older
/// than `stale_after`.
#[derive(Clone)]
pub struct AssetLifecycle {
    root: PathBuf,
    manifest_name: String,
    replace_existing: bool,
    stale_after: Duration,
    claims: ClaimTable,
}

impl fmt::Debug for AssetLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetLifecycle")
            .field("root", &self.root)
            .field("manifest_name", &self.manifest_name)
            .field("replace_existing", &self.replace_existing)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl AssetLifecycle {
    pub fn new(root: impl Into<PathBuf>, manifest_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest_name: manifest_name.into(),
            replace_existing: false,
            stale_after: DEFAULT_STALE_AFTER,
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &PackagerConfig) -> Self {
        Self::new(
            config.paths.assets_dir.clone(),
            config.packaging.manifest_name.clone(),
        )
        .with_replace_existing(config.ingest.replace_existing)
        .with_stale_after(Duration::from_secs(config.ingest.stale_marker_seconds))
    }

    pub fn with_replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    pub fn directory(&self, id: &AssetId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn marker_path(&self, id: &AssetId) -> PathBuf {
        self.directory(id).join(MARKER_FILE_NAME)
    }

    pub fn manifest_path(&self, id: &AssetId) -> PathBuf {
        self.directory(id).join(&self.manifest_name)
    }

    pub fn exists(&self, id: &AssetId) -> bool {
        self.directory(id).is_dir()
    }

    pub fn is_claimed(&self, id: &AssetId) -> bool {
        self.lock_claims().contains_key(id)
    }

    pub fn is_processing(&self, id: &AssetId) -> bool {
        self.is_claimed(id) || self.marker_path(id).exists()
    }

    pub fn is_ready(&self, id: &AssetId) -> bool {
        self.manifest_path(id).is_file() && !self.is_processing(id)
    }

    pub fn state(&self, id: &AssetId) -> AssetState {
        if self.is_claimed(id) {
            AssetState::Processing
        } else if !self.exists(id) {
            AssetState::Absent
        } else if self.is_processing(id) {
            AssetState::Processing
        } else if self.is_ready(id) {
            AssetState::Ready
        } else {
            AssetState::Incomplete
        }
    }

    /// Claims `id` by exclusively creating its marker.
    ///
    /// A live marker from any run yields `AlreadyProcessing`; a stale one is
    /// taken over and the abandoned files are cleared.
    pub async fn begin(&self, id: &AssetId) -> LifecycleResult<AssetClaim> {
        let token = Uuid::new_v4();
        {
            let mut claims = self.lock_claims();
            if claims.contains_key(id) {
                return Err(LifecycleError::AlreadyProcessing(id.clone()));
            }
            claims.insert(id.clone(), token);
        }
        let mut claim = AssetClaim {
            id: id.clone(),
            directory: self.directory(id),
            token,
            claims: Arc::clone(&self.claims),
            marker_released: false,
            finished: false,
        };

        if let Err(err) = self.acquire(&claim).await {
            claim.finished = true;
            return Err(err);
        }
        info!(asset_id = %id, directory = %claim.directory.display(), "asset claimed");
        Ok(claim)
    }

    async fn acquire(&self, claim: &AssetClaim) -> LifecycleResult<()> {
        let directory = &claim.directory;
        fs::create_dir_all(directory)
            .await
            .map_err(|source| LifecycleError::Io {
                path: directory.clone(),
                source,
            })?;

        let marker_path = claim.marker_path();
        let reclaimed = match write_marker(&marker_path, claim.token).await {
            Ok(()) => false,
            Err(source) if source.kind() == ErrorKind::AlreadyExists => {
                let reclaimed = match self.take_stale_marker(&marker_path, claim.token).await? {
                    MarkerTake::Fresh => {
                        return Err(LifecycleError::AlreadyProcessing(claim.id.clone()))
                    }
                    MarkerTake::Taken(previous) => {
                        warn!(
                            asset_id = %claim.id,
                            previous_pid = previous.as_ref().map(|marker| marker.pid),
                            "reclaiming directory left by an abandoned run"
                        );
                        true
                    }
                    MarkerTake::Missing => false,
                };
                write_marker(&marker_path, claim.token)
                    .await
                    .map_err(|source| {
                        if source.kind() == ErrorKind::AlreadyExists {
                            LifecycleError::AlreadyProcessing(claim.id.clone())
                        } else {
                            LifecycleError::Io {
                                path: marker_path.clone(),
                                source,
                            }
                        }
                    })?;
                reclaimed
            }
            Err(source) => {
                let _ = fs::remove_dir(directory).await;
                return Err(LifecycleError::Io {
                    path: marker_path,
                    source,
                });
            }
        };

        let leftovers = entries_besides_markers(directory).await?;
        if leftovers.is_empty() {
            return Ok(());
        }
        if reclaimed {
            info!(asset_id = %claim.id, files = leftovers.len(), "clearing abandoned files");
        } else if self.replace_existing {
            info!(asset_id = %claim.id, "replacing existing asset");
        } else {
            remove_file_best_effort(&marker_path).await;
            return Err(LifecycleError::AlreadyExists(claim.id.clone()));
        }
        for path in leftovers {
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            removed.map_err(|source| LifecycleError::Io { path, source })?;
        }
        Ok(())
    }

    /// Moves a stale marker aside and deletes it; a live one is left in place.
    async fn take_stale_marker(&self, marker: &Path, tag: Uuid) -> LifecycleResult<MarkerTake> {
        match self.marker_is_stale(marker).await {
            None => return Ok(MarkerTake::Missing),
            Some(false) => return Ok(MarkerTake::Fresh),
            Some(true) => {}
        }
        let aside = marker.with_file_name(format!("{MARKER_FILE_NAME}.reclaim-{}", tag.simple()));
        match fs::rename(marker, &aside).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(MarkerTake::Missing),
            Err(source) => {
                return Err(LifecycleError::Io {
                    path: marker.to_path_buf(),
                    source,
                })
            }
        }
        // another run may have replaced the marker between the check and the rename
        if self.marker_is_stale(&aside).await != Some(true) {
            let _ = fs::rename(&aside, marker).await;
            return Ok(MarkerTake::Fresh);
        }
        let previous = fs::read_to_string(&aside)
            .await
            .ok()
            .and_then(|contents| ProcessingMarker::parse(&contents));
        remove_file_best_effort(&aside).await;
        Ok(MarkerTake::Taken(previous))
    }

    /// `None` when the marker is gone. Unparseable markers are aged by mtime.
    async fn marker_is_stale(&self, marker: &Path) -> Option<bool> {
        let age = match fs::read_to_string(marker).await {
            Ok(contents) => ProcessingMarker::parse(&contents)
                .map(|parsed| (Utc::now() - parsed.started_at).to_std().unwrap_or_default()),
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(_) => None,
        };
        let age = match age {
            Some(age) => Some(age),
            None => match fs::metadata(marker).await {
                Ok(meta) => meta.modified().ok().map(|modified| {
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default()
                }),
                Err(err) if err.kind() == ErrorKind::NotFound => return None,
                Err(_) => None,
            },
        };
        Some(age.map(|age| age >= self.stale_after).unwrap_or(false))
    }

    /// Removes directories whose marker is older than the stale threshold.
    pub async fn purge_abandoned(&self) -> LifecycleResult<Vec<AssetId>> {
        let mut purged = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(purged),
            Err(source) => {
                return Err(LifecycleError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        // never clear a ready asset whose marker disappears mid-scan
        let strict = self.clone().with_replace_existing(false);
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| LifecycleError::Io {
                path: self.root.clone(),
                source,
            })?
        {
            let Some(id) = entry.file_name().to_str().and_then(AssetId::parse) else {
                continue;
            };
            if !entry.path().is_dir() || self.is_claimed(&id) {
                continue;
            }
            if self.marker_is_stale(&self.marker_path(&id)).await != Some(true) {
                continue;
            }
            match strict.begin(&id).await {
                Ok(mut claim) => {
                    claim.rollback().await;
                    info!(asset_id = %id, "purged abandoned asset");
                    purged.push(id);
                }
                Err(LifecycleError::AlreadyProcessing(_)) | Err(LifecycleError::AlreadyExists(_)) => {
                    debug!(asset_id = %id, "marker changed during purge; skipped");
                }
                Err(err) => return Err(err),
            }
        }
        purged.sort();
        Ok(purged)
    }

    fn lock_claims(&self) -> std::sync::MutexGuard<'_, HashMap<AssetId, Uuid>> {
        self.claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive ownership of one asset directory for the duration of an ingestion.
///
/// Dropping an unfinished claim releases the id but leaves the marker on disk.
pub struct AssetClaim {
    id: AssetId,
    directory: PathBuf,
    token: Uuid,
    claims: ClaimTable,
    marker_released: bool,
    finished: bool,
}

impl fmt::Debug for AssetClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetClaim")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .field("finished", &self.finished)
            .finish()
    }
}

impl AssetClaim {
    pub fn id(&self) -> &AssetId {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn marker_path(&self) -> PathBuf {
        self.directory.join(MARKER_FILE_NAME)
    }

    /// Whether the marker on disk still carries this claim's token.
    pub async fn owns_marker(&self) -> bool {
        match fs::read_to_string(self.marker_path()).await {
            Ok(contents) => ProcessingMarker::parse(&contents)
                .map(|marker| marker.token == self.token)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Removes the marker, then writes the metadata record if absent.
    pub async fn publish(&mut self, record: &MetadataRecord) -> LifecycleResult<FinalizeOutcome> {
        if !self.marker_released {
            if !self.owns_marker().await {
                return Err(LifecycleError::ClaimLost(self.id.clone()));
            }
            let marker = self.marker_path();
            match fs::remove_file(&marker).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(LifecycleError::Io {
                        path: marker,
                        source,
                    })
                }
            }
            self.marker_released = true;
        }
        let outcome = finalize_metadata(&self.directory, record).await?;
        if outcome == FinalizeOutcome::AlreadyPresent {
            debug!(asset_id = %self.id, "metadata record already present");
        }
        self.finished = true;
        info!(asset_id = %self.id, "asset published");
        Ok(outcome)
    }

    /// Removes the marker and the whole directory, unless another run owns it now.
    /// Errors are logged and ignored.
    pub async fn rollback(&mut self) {
        self.finished = true;
        if !self.marker_released && !self.owns_marker().await {
            warn!(asset_id = %self.id, "marker no longer ours; leaving directory in place");
            return;
        }
        remove_file_best_effort(&self.marker_path()).await;
        if let Err(error) = fs::remove_dir_all(&self.directory).await {
            if error.kind() != ErrorKind::NotFound {
                warn!(path = %self.directory.display(), %error, "failed to remove asset directory");
            }
        }
        info!(asset_id = %self.id, "asset rolled back");
    }
}

impl Drop for AssetClaim {
    fn drop(&mut self) {
        if !self.finished {
            warn!(asset_id = %self.id, "claim released before publish; marker left in place");
        }
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if claims.get(&self.id) == Some(&self.token) {
            claims.remove(&self.id);
        }
    }
}

async fn write_marker(path: &Path, token: Uuid) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(ProcessingMarker::new(token).render().as_bytes())
        .await?;
    file.flush().await
}

async fn entries_besides_markers(directory: &Path) -> LifecycleResult<Vec<PathBuf>> {
    let io_error = |source: std::io::Error| LifecycleError::Io {
        path: directory.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(directory).await.map_err(io_error)?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if !entry.file_name().to_string_lossy().starts_with(MARKER_FILE_NAME) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

async fn remove_file_best_effort(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), %error, "failed to remove file");
        }
    }
}
