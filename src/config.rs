//! # Configuration Management
//!
//! Centralized configuration for the packet engine.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (prefix `PACKET_ENGINE_`)
//!
//! ## Defaults
//! - Buffer size classes double from 64 bytes to 4 KB
//! - The watchdog polls once a second and allows two seconds to stop

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Packet header size: type id (u16) plus body length (u16)
pub const HEADER_SIZE: usize = 4;

/// Largest body a packet may carry (bounded by the u16 length in the header)
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Default buffer size classes, doubling from 64 bytes to 4 KB
pub const DEFAULT_SIZE_CLASSES: [usize; 7] = [64, 128, 256, 512, 1024, 2048, 4096];

/// Default watchdog poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default watchdog stop grace period
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Packet buffer pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Integrity watchdog configuration
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| EngineError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| EngineError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| EngineError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(max_free) = std::env::var("PACKET_ENGINE_MAX_FREE_PER_CLASS") {
            if let Ok(val) = max_free.parse::<usize>() {
                config.pool.max_free_per_class = val;
            }
        }

        if let Ok(poll) = std::env::var("PACKET_ENGINE_POLL_INTERVAL_MS") {
            if let Ok(val) = poll.parse::<u64>() {
                config.watchdog.poll_interval = Duration::from_millis(val);
            }
        }

        if let Ok(grace) = std::env::var("PACKET_ENGINE_GRACE_PERIOD_MS") {
            if let Ok(val) = grace.parse::<u64>() {
                config.watchdog.grace_period = Duration::from_millis(val);
            }
        }

        if let Ok(names) = std::env::var("PACKET_ENGINE_PROHIBITED") {
            config.watchdog.prohibited = names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(level) = std::env::var("PACKET_ENGINE_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| EngineError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| EngineError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.pool.validate());
        errors.extend(self.watchdog.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Packet buffer pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Buffer capacities served from free lists, strictly ascending
    pub size_classes: Vec<usize>,

    /// Free buffers retained per size class; extra releases are deallocated
    pub max_free_per_class: usize,

    /// Buffers allocated per size class when the pool is created
    pub prewarm_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_classes: DEFAULT_SIZE_CLASSES.to_vec(),
            max_free_per_class: 64,
            prewarm_per_class: 0,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.size_classes.is_empty() {
            errors.push("At least one buffer size class is required".to_string());
        }

        if self.size_classes.contains(&0) {
            errors.push("Buffer size classes must be greater than 0".to_string());
        }

        if self.size_classes.windows(2).any(|w| w[0] >= w[1]) {
            errors.push("Buffer size classes must be strictly ascending".to_string());
        }

        if let Some(&largest) = self.size_classes.last() {
            if largest > HEADER_SIZE + MAX_BODY_SIZE {
                errors.push(format!(
                    "Largest size class {largest} exceeds maximum packet size {}",
                    HEADER_SIZE + MAX_BODY_SIZE
                ));
            }
        }

        if self.prewarm_per_class > self.max_free_per_class {
            errors.push(format!(
                "Prewarm count {} exceeds max free per class {}",
                self.prewarm_per_class, self.max_free_per_class
            ));
        }

        errors
    }
}

/// Integrity watchdog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Sleep between scans
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// How long a stop request waits for the loop to reach Stopped
    #[serde(with = "duration_serde")]
    pub grace_period: Duration,

    /// Indicator names that trigger a detection (compared case-insensitively)
    #[serde(default)]
    pub prohibited: Vec<String>,

    /// Name given to the background thread
    pub thread_name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            prohibited: Vec::new(),
            thread_name: String::from("integrity-watchdog"),
        }
    }
}

impl WatchdogConfig {
    /// Validate watchdog configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.poll_interval.is_zero() {
            errors.push("Poll interval must be greater than 0".to_string());
        } else if self.poll_interval.as_secs() > 3600 {
            errors.push("Poll interval too long (maximum: 1 hour)".to_string());
        }

        if self.grace_period.is_zero() {
            errors.push("Grace period must be greater than 0".to_string());
        } else if self.grace_period.as_secs() > 60 {
            errors.push("Grace period too long (maximum: 60s)".to_string());
        }

        if self.prohibited.iter().any(|name| name.trim().is_empty()) {
            errors.push("Prohibited indicator names cannot be empty".to_string());
        }

        if self.thread_name.is_empty() {
            errors.push("Watchdog thread name cannot be empty".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-engine"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
