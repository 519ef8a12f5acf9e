use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::webhook::WebhookData;

/// Final status of a deploy run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

/// One in-flight invocation of the deploy script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployJob {
    pub id: String,
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub log_path: PathBuf,
}

impl DeployJob {
    /// Create a new job for a qualifying push
    pub fn new(data: &WebhookData, log_path: PathBuf) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            git_ref: data.git_ref.clone(),
            commit_sha: data.commit_sha.clone(),
            started_at: Utc::now(),
            pid: None,
            log_path,
        }
    }

    /// Close out the job once the script has exited.
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn finish(self, exit_code: Option<i32>) -> DeployRecord {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0);
        let status = if exit_code == Some(0) {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };
        DeployRecord {
            job: self,
            status,
            exit_code,
            finished_at,
            duration_ms,
        }
    }
}

/// A finished deploy run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRecord {
    #[serde(flatten)]
    pub job: DeployJob,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}
