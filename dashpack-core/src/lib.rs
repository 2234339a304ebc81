pub mod asset;
pub mod command;
pub mod config;
pub mod error;
pub mod library;
pub mod pipeline;
pub mod upload;

pub use asset::{
    AssetClaim, AssetId, AssetLifecycle, AssetState, AssetStatus, LifecycleError, MetadataRecord,
};
pub use command::{CommandError, CommandExecutor, CommandRunner, SystemCommandExecutor};
pub use config::{load_packager_config, PackagerConfig};
pub use error::{ConfigError, Result};
pub use library::{AssetListing, Library, LibraryError, NotReadyReason, PlaybackTarget};
pub use pipeline::{
    IngestError, IngestPipeline, IngestReport, IngestRequest, PipelineError, Stage,
};
pub use upload::{StagedUpload, UploadError, UploadIntake};
