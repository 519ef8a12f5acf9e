//! Deploy invoker: single-deploy registry and script launcher.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::deploy_log::DeployLog;
use crate::error::{HookError, Result};
use crate::job::{DeployJob, DeployRecord, JobStatus};
use crate::webhook::WebhookData;

/// How long to keep draining script output after the process exits.
/// Background children that inherited stdout can hold the pipe open forever.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Starts the external deploy process.
pub trait DeployLauncher: Send + Sync {
    /// Spawn the deploy for `job`. stdout and stderr must be piped.
    fn launch(&self, job: &DeployJob, data: &WebhookData) -> io::Result<Child>;
}

/// Runs the configured deploy script through a shell
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    shell: String,
    script: PathBuf,
}

impl ScriptLauncher {
    pub fn new(shell: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
        }
    }
}

impl DeployLauncher for ScriptLauncher {
    fn launch(&self, job: &DeployJob, data: &WebhookData) -> io::Result<Child> {
        info!(
            "Running: {} {} (job {})",
            self.shell,
            self.script.display(),
            job.id
        );
        Command::new(&self.shell)
            .arg(&self.script)
            .envs(data.to_env())
            .env("DEPLOY_JOB_ID", &job.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

/// Result of asking the registry to deploy
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Started(DeployJob),
    /// Another deploy holds the lock; nothing was spawned.
    AlreadyRunning(DeployJob),
}

#[derive(Default)]
struct RegistryState {
    current: Option<DeployJob>,
    last: Option<DeployRecord>,
}

/// Tracks the single active deploy and the last finished one.
///
/// At most one job is active at a time. The slot is cleared when the
/// process exits, whatever its exit code.
#[derive(Clone)]
pub struct DeployRegistry {
    state: Arc<Mutex<RegistryState>>,
    launcher: Arc<dyn DeployLauncher>,
    log: DeployLog,
}

impl DeployRegistry {
    pub fn new(launcher: Arc<dyn DeployLauncher>, log: DeployLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            launcher,
            log,
        }
    }

    pub fn log(&self) -> &DeployLog {
        &self.log
    }

    /// Start a deploy for `data` unless one is already running.
    ///
    /// Returns as soon as the process is spawned; a background task reaps it.
    pub async fn trigger(&self, data: &WebhookData) -> Result<TriggerOutcome> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.current {
            info!(
                "Deploy {} already in progress; ignoring push to {}",
                current.id, data.git_ref
            );
            if let Err(e) = self.log.append(format!(
                "Push to {} received while deploy {} is running, not redeploying",
                data.git_ref, current.id
            )) {
                error!("Could not record ignored push: {}", e);
            }
            return Ok(TriggerOutcome::AlreadyRunning(current.clone()));
        }

        let mut job = DeployJob::new(data, self.log.path().to_path_buf());
        self.log.append(format!(
            "Push detected on {} ({}), triggering deploy {}...",
            data.git_ref,
            data.commit_sha.as_deref().unwrap_or("unknown commit"),
            job.id
        ))?;

        let mut child = match self.launcher.launch(&job, data) {
            Ok(child) => child,
            Err(e) => {
                error!("Deploy {} failed to start: {}", job.id, e);
                return Err(HookError::SpawnFailed(e.to_string()));
            }
        };

        job.pid = child.id();
        state.current = Some(job.clone());
        drop(state);

        info!(job_id = %job.id, pid = ?job.pid, "Deploy started");

        let stdout = child
            .stdout
            .take()
            .map(|out| forward_output(out, self.log.clone(), job.id.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|err| forward_output(err, self.log.clone(), job.id.clone()));

        let registry = self.clone();
        let reaped_job = job.clone();
        tokio::spawn(async move {
            registry.reap(child, reaped_job, [stdout, stderr]).await;
        });

        Ok(TriggerOutcome::Started(job))
    }

    /// Wait for the script to exit, record the result and free the slot.
    async fn reap(&self, mut child: Child, job: DeployJob, forwarders: [Option<JoinHandle<()>>; 2]) {
        let (exit_code, wait_error) = match child.wait().await {
            Ok(status) => (status.code(), None),
            Err(e) => {
                error!("Failed to wait for deploy {}: {}", job.id, e);
                (None, Some(e.to_string()))
            }
        };

        // One grace period shared by stdout and stderr.
        let drain_deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
        for handle in forwarders.into_iter().flatten() {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(drain_deadline, handle).await.is_err() {
                warn!("Deploy {} output still open after exit; detaching", job.id);
                abort.abort();
            }
        }

        let record = job.finish(exit_code);
        let summary = deploy_summary(&record, wait_error.as_deref());

        if record.status == JobStatus::Success {
            info!("{}", summary);
        } else {
            error!("{}", summary);
        }
        if let Err(e) = self.log.append(&summary) {
            error!("Could not record deploy result: {}", e);
        }

        let mut state = self.state.lock().await;
        state.current = None;
        state.last = Some(record);
    }

    pub async fn current(&self) -> Option<DeployJob> {
        self.state.lock().await.current.clone()
    }

    pub async fn last(&self) -> Option<DeployRecord> {
        self.state.lock().await.last.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.current.is_some()
    }
}

/// One-line outcome of a deploy for the log.
fn deploy_summary(record: &DeployRecord, wait_error: Option<&str>) -> String {
    match (&record.status, record.exit_code, wait_error) {
        (_, _, Some(reason)) => format!(
            "Deploy {} exit status unknown after {}ms: {}",
            record.job.id, record.duration_ms, reason
        ),
        (JobStatus::Success, _, None) => format!(
            "Deploy {} finished successfully in {}ms",
            record.job.id, record.duration_ms
        ),
        (_, Some(code), None) => format!(
            "Deploy {} failed with exit code {} after {}ms",
            record.job.id, code, record.duration_ms
        ),
        (_, None, None) => format!(
            "Deploy {} terminated by signal after {}ms",
            record.job.id, record.duration_ms
        ),
    }
}

/// Copy each output line of the script into the deploy log.
///
/// Reads until EOF even when lines cannot be logged: closing the pipe early
/// would kill the script with SIGPIPE on its next write.
fn forward_output<R>(reader: R, log: DeployLog, job_id: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut logging = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) if logging => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if let Err(e) = log.append(format!("[{}] {}", job_id, line)) {
                        warn!("Discarding output of deploy {}: {}", job_id, e);
                        logging = false;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading output of deploy {}: {}", job_id, e);
                    break;
                }
            }
        }
    })
}
