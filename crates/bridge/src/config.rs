//! Configuration for the labshell client.
//!
//! Settings are read from a TOML file, by default
//! `~/.config/labshell/config.toml`. Every section and field is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{ErrorClassifier, DEFAULT_AUTH_MARKERS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::session::ControllerSettings;
use crate::transport::{session_endpoint, DEFAULT_ENDPOINT_PATH};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("base_url must be an http:// or https:// URL, got {0}")]
    InvalidBaseUrl(String),

    #[error("{field} must start with '/', got {value}")]
    InvalidPath { field: &'static str, value: String },

    #[error("handshake_timeout_secs must be between 1 and 300, got {0}")]
    InvalidHandshakeTimeout(u64),

    #[error("request_timeout_secs must be between 1 and 120, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("auth_markers must contain at least one non-empty marker")]
    NoAuthMarkers,

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Dashboard origin serving the inventory and the session endpoint.
    pub dashboard: DashboardConfig,

    /// Session behaviour.
    pub session: SessionConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the dashboard, e.g. `http://localhost:8000`.
    pub base_url: String,

    /// Path of the interactive session endpoint.
    pub endpoint_path: String,

    /// Path of the target inventory.
    pub inventory_path: String,

    /// Timeout for inventory requests, in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds to wait for `connected` after the channel opened.
    pub handshake_timeout_secs: u64,

    /// Case-insensitive substrings that mark an untyped backend error as an
    /// authentication failure.
    pub auth_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for the rolling log file.
    pub directory: PathBuf,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            inventory_path: "/api/servers".to_string(),
            request_timeout_secs: 5,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 15,
            auth_markers: DEFAULT_AUTH_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: default_log_dir(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("labshell")
        .join("config.toml")
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("labshell")
        .join("logs")
}

impl Config {
    /// Apply environment variable overrides.
    ///
    /// - `LABSHELL_BASE_URL`: dashboard base URL
    /// - `LABSHELL_LOG_LEVEL`: log level
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LABSHELL_BASE_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding base_url from environment: {}", url);
                self.dashboard.base_url = url;
            }
        }

        if let Ok(level) = std::env::var("LABSHELL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match Url::parse(&self.dashboard.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidBaseUrl(self.dashboard.base_url.clone())),
        }

        for (field, value) in [
            ("endpoint_path", &self.dashboard.endpoint_path),
            ("inventory_path", &self.dashboard.inventory_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    field,
                    value: value.clone(),
                });
            }
        }

        if !(1..=120).contains(&self.dashboard.request_timeout_secs) {
            return Err(ConfigError::InvalidRequestTimeout(
                self.dashboard.request_timeout_secs,
            ));
        }

        if !(1..=300).contains(&self.session.handshake_timeout_secs) {
            return Err(ConfigError::InvalidHandshakeTimeout(
                self.session.handshake_timeout_secs,
            ));
        }

        if self.session.auth_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::NoAuthMarkers);
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Parsed dashboard base URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.dashboard.base_url)
            .with_context(|| format!("Invalid base_url: {}", self.dashboard.base_url))
    }

    /// Session endpoint derived from the base URL.
    pub fn endpoint(&self) -> Result<Url> {
        Ok(session_endpoint(&self.base_url()?, &self.dashboard.endpoint_path)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard.request_timeout_secs)
    }

    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        Ok(ControllerSettings::new(self.endpoint()?)
            .with_handshake_timeout(Duration::from_secs(self.session.handshake_timeout_secs))
            .with_classifier(ErrorClassifier::new(&self.session.auth_markers)))
    }

    /// Load configuration from a file, or defaults if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
