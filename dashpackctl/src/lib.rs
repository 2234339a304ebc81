use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dashpack_core::asset::{AssetId, AssetLifecycle, AssetStatus};
use dashpack_core::command::{CommandExecutor, CommandRunner};
use dashpack_core::library::{AssetListing, Library, LibraryError, PlaybackTarget};
use dashpack_core::pipeline::{IngestError, IngestPipeline, IngestReport, PipelineError};
use dashpack_core::upload::{UploadError, UploadIntake};
use dashpack_core::{load_packager_config, LifecycleError, PackagerConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] dashpack_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("upload rejected: {0}")]
    Upload(#[from] UploadError),
    #[error("{0}")]
    Ingest(#[from] IngestError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("{0}")]
    Library(#[from] LibraryError),
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "DASH packaging command-line interface", long_about = None)]
pub struct Cli {
    /// Caminho do dashpack.toml
    #[arg(long, default_value = "configs/dashpack.toml")]
    pub config: PathBuf,
    /// Diretório override para os assets (substitui paths.assets_dir)
    #[arg(long)]
    pub assets_dir: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Nível de log (RUST_LOG tem precedência)
    #[arg(long, default_value = "info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingere um arquivo de vídeo e gera o pacote DASH
    Ingest(IngestArgs),
    /// Exibe o estado de um asset
    Status(AssetArgs),
    /// Lista os assets, mais recentes primeiro
    List,
    /// Resolve o manifesto para reprodução
    Play(AssetArgs),
    /// Remove assets abandonados por execuções interrompidas
    Recover,
    /// Executa verificações de integridade
    Health,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Arquivo de origem
    pub file: PathBuf,
    /// Nome original exibido (padrão: nome do arquivo)
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct AssetArgs {
    /// Identificador do asset
    pub id: String,
}

/// Installs the stderr subscriber; `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(&context, &cli))
}

async fn dispatch(context: &AppContext, cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Ingest(args) => {
            let report = context.ingest(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Status(args) => {
            let status = context.status(&args.id).await?;
            render(&status, cli.format)?;
        }
        Commands::List => {
            let listing = context.list().await?;
            render(&listing, cli.format)?;
        }
        Commands::Play(args) => {
            let target = context.play(&args.id).await?;
            render(&target, cli.format)?;
        }
        Commands::Recover => {
            let report = context.recover().await?;
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check().await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "Uma ou mais verificações falharam".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub struct AppContext {
    config_path: PathBuf,
    config: Arc<PackagerConfig>,
    lifecycle: AssetLifecycle,
    executor: Option<Arc<dyn CommandExecutor>>,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_packager_config(&cli.config)?;
        if let Some(dir) = &cli.assets_dir {
            config.paths.assets_dir = dir.clone();
        }
        debug!(
            config = %cli.config.display(),
            assets_dir = %config.paths.assets_dir.display(),
            "configuration loaded"
        );
        let lifecycle = AssetLifecycle::from_config(&config);
        Ok(Self {
            config_path: cli.config.clone(),
            config: Arc::new(config),
            lifecycle,
            executor: None,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    fn pipeline(&self) -> Result<IngestPipeline> {
        Ok(IngestPipeline::new(
            Arc::clone(&self.config),
            self.lifecycle.clone(),
            self.executor.clone(),
        )?)
    }

    fn library(&self) -> Library {
        Library::from_config(self.lifecycle.clone(), &self.config)
    }

    pub async fn ingest(&self, args: &IngestArgs) -> Result<IngestReport> {
        let pipeline = self.pipeline()?;
        let staged = UploadIntake::from_config(&self.config)
            .accept(&args.file, args.name.as_deref())
            .await?;
        info!(asset_id = %staged.asset_id, source = %args.file.display(), "starting ingestion");
        Ok(pipeline.ingest(staged.into()).await?)
    }

    pub async fn status(&self, id: &str) -> Result<AssetStatus> {
        Ok(self.library().status(id).await?)
    }

    pub async fn list(&self) -> Result<AssetList> {
        let rows = self.library().list().await?;
        Ok(AssetList { rows })
    }

    pub async fn play(&self, id: &str) -> Result<PlaybackTarget> {
        Ok(self.library().resolve_playback(id).await?)
    }

    pub async fn recover(&self) -> Result<RecoverReport> {
        let purged = self.lifecycle.purge_abandoned().await?;
        Ok(RecoverReport { purged })
    }

    pub async fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("dashpack.toml", &self.config_path));
        results.push(self.check_directory("assets_dir", &self.config.paths.assets_dir));
        results.push(self.check_directory("uploads_dir", &self.config.paths.uploads_dir));
        results.push(self.check_ffmpeg().await);
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} ausente", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::error(
                name,
                format!("{path} não é diretório", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!(
                    "{path} não encontrado (será criado na primeira ingestão)",
                    path = path.display()
                ),
            ),
        }
    }

    async fn check_ffmpeg(&self) -> HealthEntry {
        let runner = CommandRunner::new(self.config.tools.ffmpeg.clone(), self.executor.clone());
        match runner.run(&["-hide_banner".to_string(), "-version".to_string()]).await {
            Ok(output) => {
                let version = output.stdout.lines().next().unwrap_or("ffmpeg").to_string();
                HealthEntry::ok("ffmpeg", version)
            }
            Err(err) => HealthEntry::error("ffmpeg", err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct AssetList {
    pub rows: Vec<AssetListing>,
}

#[derive(Debug, Serialize)]
pub struct RecoverReport {
    pub purged: Vec<AssetId>,
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for IngestReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Asset: {}", self.asset_id),
            format!("Manifesto: {}", self.manifest_path.display()),
            format!(
                "Renditions: {} | Adaptation sets: {} | Segmentos: {}",
                self.renditions,
                self.adaptation_sets.len(),
                self.segments
            ),
        ];
        if let Some(thumbnail) = &self.thumbnail {
            lines.push(format!("Thumbnail: {}", thumbnail.display()));
        }
        let elapsed = self.completed_at - self.started_at;
        lines.push(format!("Duração: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0));
        lines.join("\n")
    }
}

impl DisplayFallback for AssetStatus {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Estado: {}", self.state()),
            format!(
                "exists={} is_processing={} is_ready={}",
                self.exists, self.is_processing, self.is_ready
            ),
        ];
        if !self.files.is_empty() {
            lines.push(format!("Arquivos: {}", self.files.join(", ")));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for AssetList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhum asset encontrado".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                let state = if row.is_processing {
                    "processing"
                } else if row.is_ready {
                    "ready"
                } else {
                    "incomplete"
                };
                let modified = row
                    .modified_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("{} [{}] {} ({})", row.id, state, row.original_name, modified)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for PlaybackTarget {
    fn display(&self) -> String {
        format!("{}\n{}", self.title, self.manifest_path.display())
    }
}

impl DisplayFallback for RecoverReport {
    fn display(&self) -> String {
        if self.purged.is_empty() {
            return "Nenhum asset abandonado".to_string();
        }
        let ids: Vec<_> = self.purged.iter().map(AssetId::as_str).collect();
        format!("Removidos: {}", ids.join(", "))
    }
}
