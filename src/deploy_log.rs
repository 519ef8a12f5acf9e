//! Append-only deploy log.
//!
//! All writes go through one writer task, so lines from concurrent requests
//! and from the deploy script's stdout/stderr never interleave mid-line.
//! The first failed write is kept; from then on `append` and `flush` fail.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{HookError, Result};

enum LogCommand {
    Line(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct DeployLog {
    path: PathBuf,
    tx: mpsc::UnboundedSender<LogCommand>,
    failure: Arc<OnceLock<String>>,
}

impl DeployLog {
    /// Open (or create) the log file for appending and start the writer task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HookError::ConfigError(format!(
                    "Failed to create log directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                HookError::ConfigError(format!(
                    "Failed to open deploy log '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let failure = Arc::new(OnceLock::new());
        tokio::spawn(run_writer(file, rx, path.clone(), failure.clone()));
        debug!("Deploy log opened at {}", path.display());

        Ok(Self { path, tx, failure })
    }

    fn check_writable(&self) -> Result<()> {
        match self.failure.get() {
            Some(reason) => Err(HookError::Internal(format!(
                "deploy log '{}' is not writable: {}",
                self.path.display(),
                reason
            ))),
            None => Ok(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a timestamped line. Fails once a write has failed or the writer
    /// task has stopped.
    pub fn append(&self, message: impl AsRef<str>) -> Result<()> {
        self.check_writable()?;
        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), message.as_ref());
        self.tx
            .send(LogCommand::Line(line))
            .map_err(|_| HookError::Internal("deploy log writer is not running".to_string()))
    }

    /// Wait until every line queued so far has reached the file.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(LogCommand::Flush(ack_tx))
            .map_err(|_| HookError::Internal("deploy log writer is not running".to_string()))?;
        ack_rx
            .await
            .map_err(|_| HookError::Internal("deploy log writer stopped during flush".to_string()))?;
        self.check_writable()
    }
}

async fn run_writer(
    mut file: File,
    mut rx: mpsc::UnboundedReceiver<LogCommand>,
    path: PathBuf,
    failure: Arc<OnceLock<String>>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            LogCommand::Line(line) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!("Failed to write to deploy log '{}': {}", path.display(), e);
                    let _ = failure.set(e.to_string());
                }
            }
            LogCommand::Flush(ack) => {
                if let Err(e) = file.flush().await {
                    error!("Failed to flush deploy log '{}': {}", path.display(), e);
                    let _ = failure.set(e.to_string());
                }
                let _ = ack.send(());
            }
        }
    }
}
