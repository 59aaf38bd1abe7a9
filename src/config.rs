//! Configuration management for the herdwatch sampling service.
//!
//! This module handles loading and validating configuration from
//! configuration files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the sampling service.
#[derive(Debug, Clone, Deserialize)]
pub struct HerdwatchConfig {
    /// Video feed configuration
    pub feed: FeedConfig,

    /// Sampling and encoding configuration
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Detection endpoint configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Dashboard state and status API configuration
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Video feed connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Media URI for the barn camera (e.g., "file:///video/barn.mkv"
    /// or "rtsp://camera:554/stream")
    pub uri: String,

    /// Identifier for this feed, used in logs
    pub feed_id: String,

    /// Timeout for the feed pipeline to reach the playing state, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum number of connection attempts (0 = infinite)
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    /// Base delay between connection attempts in milliseconds
    #[serde(default = "default_connect_base_delay_ms")]
    pub connect_base_delay_ms: u64,

    /// Maximum delay between connection attempts in milliseconds
    #[serde(default = "default_connect_max_delay_ms")]
    pub connect_max_delay_ms: u64,

    /// Restart playback from the beginning when the feed reaches
    /// end-of-stream
    #[serde(default = "default_loop_playback")]
    pub loop_playback: bool,
}

/// Sampling cycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Interval between sampling ticks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Target width of captured frames
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Target height of captured frames
    #[serde(default = "default_target_height")]
    pub target_height: u32,

    /// JPEG quality for encoded payloads (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Discard results from cycles older than the newest applied one.
    /// When false (the default), the last result to arrive wins
    /// regardless of which cycle produced it.
    #[serde(default)]
    pub reject_stale_results: bool,
}

/// Detection endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// URL of the cow detection endpoint
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Dashboard state and status API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Serve the read-only status API
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Bind host for the status API
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Bind port for the status API
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Maximum number of retained status log entries (0 = unbounded)
    #[serde(default)]
    pub status_log_capacity: usize,

    /// Interval between periodic stats log lines in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connection_timeout() -> u64 {
    10
}
fn default_max_connect_attempts() -> u32 {
    0
}
fn default_connect_base_delay_ms() -> u64 {
    1000
}
fn default_connect_max_delay_ms() -> u64 {
    30000
}
fn default_loop_playback() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    45000
}
fn default_target_width() -> u32 {
    640
}
fn default_target_height() -> u32 {
    480
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_endpoint_url() -> String {
    "http://127.0.0.1:5000/detect_cows".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_api_enabled() -> bool {
    true
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_stats_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            jpeg_quality: default_jpeg_quality(),
            reject_stale_results: false,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            host: default_api_host(),
            port: default_api_port(),
            status_log_capacity: 0,
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl HerdwatchConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with HERDWATCH_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            // Start with default config
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Override with environment variables (e.g., HERDWATCH_FEED__URI)
            .add_source(
                Environment::with_prefix("HERDWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("HERDWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        // Validate feed URI
        if self.feed.uri.is_empty() {
            return Err(ConfigValidationError::MissingField("feed.uri".to_string()));
        }
        let uri_ok = ["file://", "rtsp://", "rtsps://", "http://", "https://"]
            .iter()
            .any(|scheme| self.feed.uri.starts_with(scheme));
        if !uri_ok {
            return Err(ConfigValidationError::InvalidValue {
                field: "feed.uri".to_string(),
                message: "URI must use a file, rtsp or http scheme".to_string(),
            });
        }

        // Validate feed ID
        if self.feed.feed_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "feed.feed_id".to_string(),
            ));
        }

        // Validate sampling config
        if self.sampling.interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sampling.interval_ms".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }
        if self.sampling.target_width == 0 || self.sampling.target_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sampling.target_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }
        if self.sampling.jpeg_quality == 0 || self.sampling.jpeg_quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sampling.jpeg_quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }

        // Validate detector config
        if self.detector.endpoint_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "detector.endpoint_url".to_string(),
            ));
        }
        if !self.detector.endpoint_url.starts_with("http://")
            && !self.detector.endpoint_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "detector.endpoint_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }
}

impl FeedConfig {
    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get base connection retry delay as Duration.
    pub fn connect_base_delay(&self) -> Duration {
        Duration::from_millis(self.connect_base_delay_ms)
    }

    /// Get maximum connection retry delay as Duration.
    pub fn connect_max_delay(&self) -> Duration {
        Duration::from_millis(self.connect_max_delay_ms)
    }
}

impl SamplingConfig {
    /// Get the sampling interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl DetectorConfig {
    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DashboardConfig {
    /// Get the stats logging interval as Duration.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
