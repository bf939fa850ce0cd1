//! Configuration management for Tidal
//!
//! Configuration is layered:
//! - hardcoded defaults
//! - a YAML/TOML/JSON file (`TIDAL_CONFIG`, then `./config/tidal`)
//! - `TIDAL__SECTION__KEY` environment variables

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure for Tidal
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TidalConfig {
    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub flush: FlushConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TidalConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by TIDAL_CONFIG env var
    /// 3. ./config/tidal.{yaml,toml,json}
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("TIDAL_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/tidal").required(false));

        // Example: TIDAL__FLUSH__RETRY__MAX_ATTEMPTS=8
        builder = builder.add_source(
            Environment::with_prefix("TIDAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TidalConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, layered over the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: TidalConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Segment sealing
            .set_default("segment.max_rows", 65_536)?
            .set_default("segment.max_bytes", 512 * 1024 * 1024)?
            .set_default("segment.default_shards", 1)?
            // Flush persistence retry
            .set_default("flush.retry.max_attempts", 5)?
            .set_default("flush.retry.initial_backoff_ms", 20)?
            .set_default("flush.retry.max_backoff_ms", 2000)?
            .set_default("flush.retry.backoff_multiplier", 2.0)?
            // Index build retry
            .set_default("index.retry.max_attempts", 3)?
            .set_default("index.retry.initial_backoff_ms", 20)?
            .set_default("index.retry.max_backoff_ms", 2000)?
            .set_default("index.retry.backoff_multiplier", 2.0)?
            .set_default("index.max_parallel_builds", 4)?
            // Query
            .set_default("query.default_timeout_ms", 10_000)?
            .set_default("query.wait_poll_interval_ms", 10)?
            .set_default("query.max_filter_depth", 32)?
            .set_default("query.max_top_k", 16_384)?
            // Reconciler
            .set_default("reconcile.tick_interval_ms", 200)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment.max_rows == 0 {
            return Err(ConfigError::Message(
                "segment.max_rows must be > 0".to_string(),
            ));
        }

        if self.segment.max_bytes == 0 {
            return Err(ConfigError::Message(
                "segment.max_bytes must be > 0".to_string(),
            ));
        }

        if self.segment.default_shards == 0 {
            return Err(ConfigError::Message(
                "segment.default_shards must be > 0".to_string(),
            ));
        }

        if self.flush.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "flush.retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.index.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "index.retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.index.max_parallel_builds == 0 {
            return Err(ConfigError::Message(
                "index.max_parallel_builds must be > 0".to_string(),
            ));
        }

        if self.query.wait_poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "query.wait_poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.reconcile.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "reconcile.tick_interval_ms must be > 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(format!(
                "logging.format must be `pretty` or `json`, got `{}`",
                self.logging.format
            )));
        }

        Ok(())
    }
}

/// Growing segment sealing thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentConfig {
    /// Row count at which a growing segment is sealed
    pub max_rows: u64,

    /// Approximate byte size at which a growing segment is sealed
    pub max_bytes: u64,

    /// Shard count used when a collection does not specify one
    pub default_shards: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_rows: 65_536,
            max_bytes: 512 * 1024 * 1024,
            default_shards: 1,
        }
    }
}

/// Flush persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlushConfig {
    #[serde(default = "FlushConfig::default_retry")]
    pub retry: RetryConfig,
}

impl FlushConfig {
    fn default_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 20,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            retry: Self::default_retry(),
        }
    }
}

/// Index build configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "IndexConfig::default_retry")]
    pub retry: RetryConfig,

    /// Maximum number of segment builds running at once
    pub max_parallel_builds: usize,
}

impl IndexConfig {
    fn default_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            retry: Self::default_retry(),
            max_parallel_builds: 4,
        }
    }
}

/// Retry configuration for operations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 20,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Get maximum backoff duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Calculate backoff delay for a given retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let delay_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Query router configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Deadline applied when a request does not carry one
    pub default_timeout_ms: u64,

    /// Poll interval while a read waits for flush/load/index progress
    pub wait_poll_interval_ms: u64,

    /// Maximum filter nesting depth
    pub max_filter_depth: usize,

    /// Largest accepted top_k
    pub max_top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            wait_poll_interval_ms: 10,
            max_filter_depth: 32,
            max_top_k: 16_384,
        }
    }
}

impl QueryConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}

/// Background reconciler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Interval between passes when no segment transition wakes the reconciler
    pub tick_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
        }
    }
}

impl ReconcileConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
