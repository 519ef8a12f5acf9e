//! Webhook handler for push events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, header::CONTENT_LENGTH},
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::deploy::TriggerOutcome;
use crate::error::{HookError, Result};
use crate::signature::authenticate;
use crate::webhook::{EventKind, WebhookEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Deploying,
    Skipped,
    AlreadyInProgress,
    Ignored,
    Pong,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl WebhookResponse {
    fn status(status: WebhookStatus) -> Self {
        Self {
            status,
            job_id: None,
        }
    }
}

/// Handles the webhook POST request.
///
/// Rejections are written to the deploy log as well as returned.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    match process_webhook(&state, &headers, body).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if let Err(log_err) = state.deploys.log().append(format!("Error: {}", e)) {
                error!("Could not write to deploy log: {}", log_err);
            }
            Err(e)
        }
    }
}

async fn process_webhook(
    state: &SharedState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse> {
    if !headers.contains_key(CONTENT_LENGTH) {
        warn!("Webhook request without Content-Length");
        return Err(HookError::MalformedPayload(
            "missing Content-Length header".to_string(),
        ));
    }

    let event = WebhookEvent::from_parts(headers, body);
    authenticate(&state.config, &event.body, event.signature.as_deref())?;

    match &event.kind {
        EventKind::Push => {}
        EventKind::Ping => {
            info!("Received ping event");
            return Ok(WebhookResponse::status(WebhookStatus::Pong));
        }
        EventKind::Other(kind) => {
            info!("Not push event; Received {:?} event", kind);
            return Ok(WebhookResponse::status(WebhookStatus::Ignored));
        }
    }

    let data = event.parse_push().inspect_err(|e| {
        warn!("Could not parse webhook body: {}", e);
    })?;
    debug!("Push payload: {:?}", data);

    if !data.is_qualifying(&state.config.allowed_ref) {
        info!(
            "Push to '{}' does not match '{}', skipping.",
            data.git_ref, state.config.allowed_ref
        );
        state
            .deploys
            .log()
            .append(format!("Push to {} skipped", data.git_ref))?;
        return Ok(WebhookResponse::status(WebhookStatus::Skipped));
    }

    match state.deploys.trigger(&data).await? {
        TriggerOutcome::Started(job) => Ok(WebhookResponse {
            status: WebhookStatus::Deploying,
            job_id: Some(job.id),
        }),
        TriggerOutcome::AlreadyRunning(job) => Ok(WebhookResponse {
            status: WebhookStatus::AlreadyInProgress,
            job_id: Some(job.id),
        }),
    }
}
