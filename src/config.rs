//! Configuration file parser for `newswire.toml`.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged as warnings
//! since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::RetryPolicy;
use crate::refresh::RefreshSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Minutes between scheduled full sweeps.
    pub sweep_interval_minutes: u64,

    /// Concurrent feed downloads during a sweep.
    pub fetch_workers: usize,

    /// Concurrent per-source persistence tasks during a sweep.
    pub saver_workers: usize,

    /// Workers draining the refresh queue.
    pub refresh_workers: usize,

    /// Maximum queued refresh requests before new ones are rejected.
    pub refresh_queue_capacity: usize,

    /// Minimum seconds between two accepted refreshes of one user.
    pub refresh_cooldown_secs: u64,

    /// Hours a refresh request stays queryable.
    pub request_ttl_hours: u64,

    /// Minutes between janitor passes over refresh state.
    pub janitor_interval_minutes: u64,

    /// Per-request HTTP timeout.
    pub fetch_timeout_secs: u64,

    /// Attempts per feed fetch, including the first.
    pub fetch_attempts: u32,

    /// Fixed delay between fetch attempts.
    pub fetch_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("newswire.db"),
            sweep_interval_minutes: 15,
            fetch_workers: 10,
            saver_workers: 5,
            refresh_workers: 5,
            refresh_queue_capacity: 100,
            refresh_cooldown_secs: 180,
            request_ttl_hours: 24,
            janitor_interval_minutes: 60,
            fetch_timeout_secs: 30,
            fetch_attempts: 3,
            fetch_retry_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "database_path",
        "sweep_interval_minutes",
        "fetch_workers",
        "saver_workers",
        "refresh_workers",
        "refresh_queue_capacity",
        "refresh_cooldown_secs",
        "request_ttl_hours",
        "janitor_interval_minutes",
        "fetch_timeout_secs",
        "fetch_attempts",
        "fetch_retry_delay_ms",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Interval between scheduled sweeps (minimum one minute).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_attempts.max(1),
            delay: Duration::from_millis(self.fetch_retry_delay_ms),
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            workers: self.refresh_workers.max(1),
            queue_capacity: self.refresh_queue_capacity.max(1),
            cooldown: Duration::from_secs(self.refresh_cooldown_secs),
            request_ttl: Duration::from_secs(self.request_ttl_hours * 60 * 60),
            janitor_interval: Duration::from_secs(self.janitor_interval_minutes.max(1) * 60),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
