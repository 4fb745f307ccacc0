//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! and the top-level [`DriveConfig`] consumed by the drive binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cia402_common::config::{load_drive_config, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = load_drive_config(Path::new("drive.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::consts::{
    CYCLE_TIME_US, CYCLE_TIME_US_MAX, CYCLE_TIME_US_MIN, LOG_QUEUE_CAPACITY, MAX_IMAGE_SIZE,
    MAX_SLAVES, PDO_SIZE,
};
use crate::profile::{MotorConfig, ProfilerConfig};
use crate::slave::{PdoRegion, SlaveConfig, SlaveType};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "cia402-drive"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Drive Config ───────────────────────────────────────────────────

/// One `[[slaves]]` entry of the topology.
///
/// Regions may be omitted; they are then laid out as consecutive
/// 36-byte blocks in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlaveEntry {
    pub id: u16,
    pub slave_type: SlaveType,
    #[serde(default)]
    pub input: Option<PdoRegion>,
    #[serde(default)]
    pub output: Option<PdoRegion>,
}

/// Top-level drive configuration.
///
/// Loaded from TOML at startup. Immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriveConfig {
    pub shared: SharedConfig,

    /// Cycle period [µs] (default: 1000).
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,

    /// Logging queue capacity [events] (default: 256).
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,

    /// Motor constants.
    #[serde(default)]
    pub motor: MotorConfig,

    /// Explicit profile; derived from `motor` when absent.
    #[serde(default)]
    pub profiler: Option<ProfilerConfig>,

    /// Bus topology.
    #[serde(default)]
    pub slaves: Vec<SlaveEntry>,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US
}
fn default_log_queue_capacity() -> usize {
    LOG_QUEUE_CAPACITY
}

impl DriveConfig {
    /// Validate parameter bounds and topology consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.cycle_time_us < CYCLE_TIME_US_MIN || self.cycle_time_us > CYCLE_TIME_US_MAX {
            return Err(ConfigError::ValidationError(format!(
                "cycle_time_us {} out of range [{}, {}]",
                self.cycle_time_us, CYCLE_TIME_US_MIN, CYCLE_TIME_US_MAX
            )));
        }
        if self.log_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "log_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.slaves.len() > MAX_SLAVES {
            return Err(ConfigError::ValidationError(format!(
                "{} slaves exceed limit of {}",
                self.slaves.len(),
                MAX_SLAVES
            )));
        }

        self.motor
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("motor: {e}")))?;
        self.profiler()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("profiler: {e}")))?;

        let mut ids = HashSet::new();
        for slave in &self.slaves {
            if !ids.insert(slave.id) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate slave id {}",
                    slave.id
                )));
            }
        }
        for slave in self.topology() {
            for (image, region) in [("input", slave.input), ("output", slave.output)] {
                if !region.fits(MAX_IMAGE_SIZE) {
                    return Err(ConfigError::ValidationError(format!(
                        "slave {}: {} region {}+{} exceeds process image of {} bytes",
                        slave.id, image, region.offset, region.len, MAX_IMAGE_SIZE
                    )));
                }
            }
        }
        Ok(())
    }

    /// Effective profile: explicit `[profiler]` or derived from `[motor]`.
    pub fn profiler(&self) -> ProfilerConfig {
        self.profiler
            .clone()
            .unwrap_or_else(|| ProfilerConfig::from_motor(&self.motor))
    }

    /// Resolve the topology into slave records with concrete regions.
    pub fn topology(&self) -> Vec<SlaveConfig> {
        let mut next_in = 0usize;
        let mut next_out = 0usize;
        self.slaves
            .iter()
            .map(|entry| {
                let input = entry.input.unwrap_or(PdoRegion::new(next_in, PDO_SIZE));
                let output = entry.output.unwrap_or(PdoRegion::new(next_out, PDO_SIZE));
                next_in = next_in.max(input.end());
                next_out = next_out.max(output.end());
                SlaveConfig {
                    id: entry.id,
                    slave_type: entry.slave_type,
                    input,
                    output,
                }
            })
            .collect()
    }
}

/// Load and validate a [`DriveConfig`].
pub fn load_drive_config(path: &Path) -> Result<DriveConfig, ConfigError> {
    let config = DriveConfig::load(path)?;
    config.validate()?;
    Ok(config)
}
