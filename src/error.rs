use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;
use tracing::error;

/// Custom error type for deploy_hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Webhook authentication failed: {0}")]
    Unauthorized(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to spawn deploy script: {0}")]
    SpawnFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl HookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            HookError::ConfigError(_)
            | HookError::SpawnFailed(_)
            | HookError::Internal(_)
            | HookError::IoError(_)
            | HookError::TomlParseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
