//! HMAC-SHA256 request authentication for `X-Hub-Signature-256`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, warn};

use crate::config::ReceiverConfig;
use crate::error::{HookError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the `sha256=<hex>` signature of `payload` under `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Verify a GitHub-style webhook signature.
///
/// The digest comparison is constant-time (`Mac::verify_slice`).
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(provided_hex) = signature_header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        warn!("Signature header missing '{}' prefix", SIGNATURE_PREFIX);
        return false;
    };

    let provided = match hex::decode(provided_hex) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Signature is not valid hex: {}", e);
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Decide whether a request may proceed past authentication.
///
/// Unsigned requests pass only when `require_signature` is off.
pub fn authenticate(config: &ReceiverConfig, payload: &[u8], signature: Option<&str>) -> Result<()> {
    match signature {
        None if config.require_signature => {
            error!("Rejected unsigned webhook request");
            Err(HookError::Unauthorized(format!(
                "missing {} header",
                SIGNATURE_HEADER
            )))
        }
        None => {
            warn!("Accepting unsigned webhook request (signature checks disabled)");
            Ok(())
        }
        Some(_) if !config.has_secret() => {
            // Signed request but nothing to check it against.
            error!("Signed webhook received but no secret is configured");
            Err(HookError::Unauthorized("no secret configured".to_string()))
        }
        Some(header) => {
            if verify_signature(&config.secret, payload, header) {
                Ok(())
            } else {
                error!("Signature verification failed");
                Err(HookError::Unauthorized("signature mismatch".to_string()))
            }
        }
    }
}
