//! Status endpoint

use axum::{Json, extract::State as AxumState};
use serde::Serialize;

use crate::SharedState;
use crate::job::{DeployJob, DeployRecord, JobStatus};

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: &'static str,
    pub started_at: String,
    pub uptime_seconds: u64,
    pub allowed_ref: String,
}

#[derive(Debug, Serialize)]
pub struct CurrentDeploy {
    #[serde(flatten)]
    pub job: DeployJob,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerInfo,
    pub current: Option<CurrentDeploy>,
    pub last: Option<DeployRecord>,
}

/// GET /status - server info, running deploy and last finished deploy
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<StatusResponse> {
    let current = state.deploys.current().await.map(|job| CurrentDeploy {
        job,
        status: JobStatus::Running,
    });
    let last = state.deploys.last().await;

    Json(StatusResponse {
        server: ServerInfo {
            name: state.config.service_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            started_at: state.started_at.to_rfc3339(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            allowed_ref: state.config.allowed_ref.clone(),
        },
        current,
        last,
    })
}
