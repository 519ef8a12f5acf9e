//! Liveness endpoints. No authentication, no side effects.

use axum::{
    Json,
    extract::State as AxumState,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: &'static str,
    pub service: String,
    pub domain: String,
    pub deploying: bool,
    pub timestamp: String,
}

/// GET /health
pub async fn health(AxumState(state): AxumState<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "running",
        service: state.config.service_name.clone(),
        domain: state.config.domain.clone(),
        deploying: state.deploys.is_running().await,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Plain-text liveness for GET on the webhook path and any unknown path
pub async fn liveness(AxumState(state): AxumState<SharedState>) -> String {
    format!("{} - Running", state.config.service_name)
}

pub async fn fallback(state: AxumState<SharedState>, method: Method) -> Response {
    if method == Method::GET || method == Method::HEAD {
        liveness(state).await.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
    }
}
