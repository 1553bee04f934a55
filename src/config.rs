//! Configuration file parser for ~/.config/feedmill/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::RetryPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is outside its usable range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level ingestion configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite content store.
    pub database_path: String,

    /// Rotating User-Agent pool. Empty means the built-in browser list.
    pub user_agents: Vec<String>,

    /// Maximum number of feeds fetched and processed at the same time.
    pub max_concurrent_feeds: usize,

    /// Timeout for a single feed request, in seconds.
    pub request_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Interval between scheduled ingestion passes, in minutes.
    pub refresh_interval_minutes: u64,

    /// Number of article links remembered by the in-process dedup cache.
    pub link_cache_capacity: usize,

    pub retry: RetryConfig,

    pub thumbnails: ThumbnailConfig,
}

/// Backoff parameters for feed fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    /// Upper bound of the uniform jitter added to every wait.
    pub jitter_max_ms: u64,
}

/// Open-Graph thumbnail fallback settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Fetch article pages for `og:image` when the feed carries no image.
    pub fetch_og_images: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// HEAD-check page-derived image URLs and drop the ones that fail.
    pub validate_with_head: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedmill.db".to_string(),
            user_agents: Vec::new(),
            max_concurrent_feeds: 8,
            request_timeout_secs: 10,
            max_feed_bytes: 10 * 1024 * 1024,
            refresh_interval_minutes: 30,
            link_cache_capacity: 50_000,
            retry: RetryConfig::default(),
            thumbnails: ThumbnailConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
            factor: 2.0,
            jitter_max_ms: 1000,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            fetch_og_images: true,
            concurrency: 8,
            timeout_secs: 5,
            validate_with_head: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Environment variable overriding `database_path`.
    pub const DATABASE_ENV: &'static str = "FEEDMILL_DATABASE";

    /// Environment variable overriding `user_agents` (comma separated).
    pub const USER_AGENTS_ENV: &'static str = "FEEDMILL_USER_AGENTS";

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "user_agents",
                "max_concurrent_feeds",
                "request_timeout_secs",
                "max_feed_bytes",
                "refresh_interval_minutes",
                "link_cache_capacity",
                "retry",
                "thumbnails",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            concurrency = config.max_concurrent_feeds,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Applies `FEEDMILL_*` environment overrides. Env vars take precedence
    /// over the config file.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(Self::DATABASE_ENV) {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }
        if let Ok(list) = std::env::var(Self::USER_AGENTS_ENV) {
            let agents: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(str::to_string)
                .collect();
            if !agents.is_empty() {
                self.user_agents = agents;
            }
        }
    }

    /// Rejects values that would stall or disable the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_feeds == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_feeds must be at least 1".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.factor.is_finite() && self.retry.factor >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.factor must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.thumbnails.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "thumbnails.concurrency must be at least 1".to_string(),
            ));
        }
        if self.link_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "link_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            factor: self.retry.factor,
            jitter_max: Duration::from_millis(self.retry.jitter_max_ms),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
