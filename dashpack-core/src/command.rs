use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn ({command}): {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("command failed ({command}) with status {status:?}: {stderr}")]
    ExternalToolFailure {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

pub type CommandResult<T> = Result<T, CommandError>;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external program to completion. No retries, no timeout.
#[derive(Clone)]
pub struct CommandRunner {
    program: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRunner")
            .field("program", &self.program)
            .finish()
    }
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            program: program.into(),
            executor,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn render(&self, args: &[String]) -> String {
        let mut line = self.program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub async fn run(&self, args: &[String]) -> CommandResult<CommandOutput> {
        let command = self.render(args);
        debug!(%command, "running external tool");
        let output = self
            .executor
            .run(&self.program, args)
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            warn!(%command, status = ?output.status.code(), "external tool failed");
            return Err(CommandError::ExternalToolFailure {
                command,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}
