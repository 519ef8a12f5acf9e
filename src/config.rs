//! Receiver configuration, read once at startup.
//!
//! Values come from an optional TOML file (path in `DEPLOY_HOOK_CONFIG`),
//! then environment variables, which override the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HookError, Result};

pub const CONFIG_PATH_VAR: &str = "DEPLOY_HOOK_CONFIG";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9000;
const DEFAULT_ALLOWED_REF: &str = "refs/heads/main";
const DEFAULT_DEPLOY_SCRIPT: &str = "scripts/deploy.sh";
const DEFAULT_LOG_FILE: &str = "deploy-webhook.log";
const DEFAULT_SERVICE_NAME: &str = "Deploy Webhook Receiver";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024; // 5MB

/// Paths reserved for the receiver's own GET endpoints.
const RESERVED_PATHS: [&str; 2] = ["/health", "/status"];

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReceiverConfig {
    /// HMAC key shared with the webhook sender
    pub secret: String,
    pub deploy_script: PathBuf,
    /// Append-only deploy log
    pub log_file: PathBuf,
    pub host: String,
    pub port: u16,
    /// Full ref whose pushes trigger a deploy
    pub allowed_ref: String,
    pub webhook_path: String,
    /// Reject requests without `X-Hub-Signature-256`
    pub require_signature: bool,
    pub service_name: String,
    /// Cosmetic, echoed by the health endpoint
    pub domain: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Interpreter used to run the deploy script
    pub shell: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            deploy_script: PathBuf::from(DEFAULT_DEPLOY_SCRIPT),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_ref: DEFAULT_ALLOWED_REF.to_string(),
            webhook_path: "/".to_string(),
            require_signature: true,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            domain: "localhost".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shell: "bash".to_string(),
        }
    }
}

impl ReceiverConfig {
    /// Load the configuration from the optional TOML file and the process
    /// environment, then validate it.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_toml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            HookError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        Ok(toml::from_str(config_str)?)
    }

    /// Override fields from variables returned by `lookup`.
    ///
    /// `WEBHOOK_PORT` takes precedence over `PORT`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.secret = secret;
        }
        if let Some(path) = lookup("DEPLOY_SCRIPT") {
            self.deploy_script = PathBuf::from(path);
        }
        if let Some(path) = lookup("DEPLOY_LOG_FILE") {
            self.log_file = PathBuf::from(path);
        }
        if let Some(host) = lookup("WEBHOOK_HOST") {
            self.host = host;
        }
        if let Some((key, port)) = lookup("WEBHOOK_PORT")
            .map(|p| ("WEBHOOK_PORT", p))
            .or_else(|| lookup("PORT").map(|p| ("PORT", p)))
        {
            self.port = parse_var(key, &port)?;
        }
        if let Some(git_ref) = lookup("DEPLOY_REF") {
            self.allowed_ref = git_ref;
        }
        if let Some(path) = lookup("WEBHOOK_PATH") {
            self.webhook_path = path;
        }
        if let Some(flag) = lookup("WEBHOOK_REQUIRE_SIGNATURE") {
            self.require_signature = parse_bool("WEBHOOK_REQUIRE_SIGNATURE", &flag)?;
        }
        if let Some(name) = lookup("SERVICE_NAME") {
            self.service_name = name;
        }
        if let Some(domain) = lookup("DOMAIN") {
            self.domain = domain;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(bytes) = lookup("MAX_BODY_BYTES") {
            self.max_body_bytes = parse_var("MAX_BODY_BYTES", &bytes)?;
        }
        if let Some(shell) = lookup("DEPLOY_SHELL") {
            self.shell = shell;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.require_signature && !self.has_secret() {
            return Err(HookError::ConfigError(
                "WEBHOOK_SECRET must be set when signatures are required".to_string(),
            ));
        }
        if self.allowed_ref.trim().is_empty() {
            return Err(HookError::ConfigError("allowed_ref is empty".to_string()));
        }
        if !self.webhook_path.starts_with('/') {
            return Err(HookError::ConfigError(format!(
                "webhook_path '{}' must start with '/'",
                self.webhook_path
            )));
        }
        if RESERVED_PATHS.contains(&self.webhook_path.as_str()) {
            return Err(HookError::ConfigError(format!(
                "webhook_path '{}' is reserved",
                self.webhook_path
            )));
        }
        if self.shell.trim().is_empty() {
            return Err(HookError::ConfigError("shell is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(HookError::ConfigError(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if a non-empty secret is set.
    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| HookError::ConfigError(format!("Invalid value '{}' for {}: {}", value, key, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HookError::ConfigError(format!(
            "Invalid boolean '{}' for {}",
            value, key
        ))),
    }
}
