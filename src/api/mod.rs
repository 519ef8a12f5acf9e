//! API module for all HTTP handlers

pub mod health;
pub mod status;
pub mod webhook;

// Re-export handlers
pub use health::{fallback, health, liveness};
pub use status::status;
pub use webhook::handle_webhook;
