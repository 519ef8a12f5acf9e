pub mod api;
pub mod config;
pub mod deploy;
pub mod deploy_log;
pub mod error;
pub mod job;
pub mod logging;
pub mod signature;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use config::ReceiverConfig;
pub use deploy::{DeployLauncher, DeployRegistry, ScriptLauncher};
pub use deploy_log::DeployLog;
pub use error::HookError;

pub struct AppState {
    pub config: ReceiverConfig,
    pub deploys: DeployRegistry,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ReceiverConfig, deploys: DeployRegistry) -> Self {
        Self {
            config,
            deploys,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Build the receiver's router: webhook, health, status, and a GET fallback.
pub fn build_router(state: SharedState) -> Router {
    let webhook_path = state.config.webhook_path.clone();
    let body_limit = state.config.max_body_bytes;
    let timeout = state.config.request_timeout();

    Router::new()
        .route("/health", routing::get(api::health))
        .route("/status", routing::get(api::status))
        .route(
            &webhook_path,
            routing::post(api::handle_webhook).get(api::liveness),
        )
        .fallback(api::fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
