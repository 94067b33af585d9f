/*!
 * Configuration management for berryrig.
 *
 * This module provides functionality to load, validate, and access
 * configuration settings for berryrig components. Settings are layered:
 * built-in defaults, then an optional TOML file, then environment variables
 * with the `BERRYRIG_` prefix.
 */
use std::path::Path;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Core configuration for berryrig
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hardware configuration
    #[serde(default)]
    pub hardware: HardwareConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Server/application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to stdout
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
}

/// Hardware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Fail the whole build when any element is invalid instead of
    /// skipping the offending element
    #[serde(default)]
    pub strict_validation: bool,

    /// Force emulation for every element, even on a Raspberry Pi
    #[serde(default)]
    pub emulate: bool,

    /// Default interval for Task monitors in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            logging: LoggingConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            strict_validation: false,
            emulate: false,
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

fn default_app_name() -> String {
    "berryrig".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

fn default_monitor_interval_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from defaults and environment variables only
    pub fn load_env() -> Result<Self> {
        Self::build(None)
    }

    /// Load configuration from a TOML file, overlaid with environment
    /// variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigLib::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("BERRYRIG").separator("__"))
            .build()
            .map_err(|e| Error::config(format!("Failed to load configuration: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;

        debug!("loaded configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "berryrig");
        assert!(!config.hardware.strict_validation);
        assert!(!config.hardware.emulate);
        assert_eq!(config.hardware.monitor_interval_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_env_only() {
        let config = Config::load_env().unwrap();
        assert_eq!(config.general.environment, "development");
    }
}
