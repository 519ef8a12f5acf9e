//! Webhook related structures

use axum::{body::Bytes, http::HeaderMap};
use serde_json::Value;

use crate::error::{HookError, Result};
use crate::signature::SIGNATURE_HEADER;

pub const EVENT_HEADER: &str = "X-GitHub-Event";

const MAX_COMMIT_MSG_LEN: usize = 500;

/// Event type announced by the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Ping,
    Other(String),
}

impl EventKind {
    /// A missing header is treated as a push.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("push") => EventKind::Push,
            Some("ping") => EventKind::Ping,
            Some(other) => EventKind::Other(other.to_string()),
        }
    }
}

/// An inbound webhook request before authentication
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub body: Bytes,
    pub signature: Option<String>,
    pub kind: EventKind,
}

impl WebhookEvent {
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Self {
        // A header with non-ASCII bytes is kept so that it fails verification
        // instead of reading as "unsigned".
        let signature = headers
            .get(SIGNATURE_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let kind = EventKind::from_header(headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok()));
        Self {
            body,
            signature,
            kind,
        }
    }

    /// Parse the body as a push notification and pull out `ref`.
    pub fn parse_push(&self) -> Result<WebhookData> {
        let payload: Value = serde_json::from_slice(&self.body)
            .map_err(|e| HookError::MalformedPayload(format!("invalid JSON body: {}", e)))?;

        if !payload.is_object() {
            return Err(HookError::MalformedPayload(
                "payload is not a JSON object".to_string(),
            ));
        }

        let git_ref = payload
            .get("ref")
            .and_then(|r| r.as_str())
            .ok_or_else(|| HookError::MalformedPayload("missing 'ref' field".to_string()))?;

        Ok(WebhookData::from_payload(git_ref, &payload))
    }
}

/// Data extracted from a push payload.
/// This data is passed to the deploy script as environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookData {
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub commit_author_name: Option<String>,
    pub pusher_name: Option<String>,
    pub repository: Option<String>,
}

impl WebhookData {
    /// Create webhook data carrying only the ref
    pub fn minimal(git_ref: impl Into<String>) -> Self {
        Self {
            git_ref: git_ref.into(),
            commit_sha: None,
            commit_message: None,
            commit_author_name: None,
            pusher_name: None,
            repository: None,
        }
    }

    fn from_payload(git_ref: &str, payload: &Value) -> Self {
        let str_at = |path: &[&str]| -> Option<String> {
            path.iter()
                .try_fold(payload, |node, key| node.get(key))
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        Self {
            git_ref: git_ref.to_string(),
            commit_sha: str_at(&["after"]),
            commit_message: str_at(&["head_commit", "message"]).map(truncate_message),
            commit_author_name: str_at(&["head_commit", "author", "name"]),
            pusher_name: str_at(&["pusher", "name"]),
            repository: str_at(&["repository", "full_name"]),
        }
    }

    /// Branch name without the `refs/heads/` prefix
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// True when this push targets the deploy branch.
    pub fn is_qualifying(&self, allowed_ref: &str) -> bool {
        self.git_ref == allowed_ref
    }

    /// Environment variables handed to the deploy script
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("DEPLOY_REF", self.git_ref.clone()),
            ("DEPLOY_BRANCH", self.branch().to_string()),
        ];
        let optional = [
            ("DEPLOY_COMMIT_SHA", &self.commit_sha),
            ("DEPLOY_COMMIT_MESSAGE", &self.commit_message),
            ("DEPLOY_COMMIT_AUTHOR", &self.commit_author_name),
            ("DEPLOY_PUSHER", &self.pusher_name),
            ("DEPLOY_REPOSITORY", &self.repository),
        ];
        env.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.clone().map(|v| (key, v))),
        );
        env
    }
}

fn truncate_message(message: String) -> String {
    if message.chars().count() > MAX_COMMIT_MSG_LEN {
        let truncated: String = message.chars().take(MAX_COMMIT_MSG_LEN).collect();
        format!("{}... (truncated)", truncated)
    } else {
        message
    }
}
