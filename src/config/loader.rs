//! Configuration loader for memedit
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use crate::memory::Protection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_memory")]
    pub memory: MemoryConfig,

    #[serde(default = "default_detour")]
    pub detour: DetourConfig,

    #[serde(default = "default_injection")]
    pub injection: InjectionConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Memory accessor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Upper bound on bytes consumed by one string read
    #[serde(default = "default_max_string_bytes")]
    pub max_string_bytes: usize,
    /// Protection used by allocations that do not name one
    #[serde(default = "default_allocation_protection")]
    pub allocation_protection: Protection,
}

/// Detour engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetourConfig {
    /// Refuse to copy relative instructions into a trampoline
    #[serde(default = "default_reject_relative_prefix")]
    pub reject_relative_prefix: bool,
    /// Bytes fetched per disassembler refill
    #[serde(default = "default_decode_window")]
    pub decode_window: usize,
}

/// Injection and remote call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Wait limit for remote export calls; absent waits forever
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: Option<u64>,
    /// Wait limit for the remote module load; absent waits forever
    #[serde(default = "default_inject_timeout_ms")]
    pub inject_timeout_ms: Option<u64>,
}

impl InjectionConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn inject_timeout(&self) -> Option<Duration> {
        self.inject_timeout_ms.map(Duration::from_millis)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration or returns defaults if the file is missing or malformed
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => Config::default(),
            Err(e) => {
                tracing::warn!(path = %self.config_path.display(), error = %e, "Falling back to default configuration");
                Config::default()
            }
        }
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads configuration from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    let config = ConfigLoader::new("memedit.toml").load_or_default();
    super::validate_config(&config)?;
    Ok(config)
}

// Default functions for serde
fn default_memory() -> MemoryConfig {
    let defaults = default_config();
    MemoryConfig {
        max_string_bytes: defaults.memory.max_string_bytes,
        allocation_protection: defaults.memory.allocation_protection,
    }
}

fn default_detour() -> DetourConfig {
    let defaults = default_config();
    DetourConfig {
        reject_relative_prefix: defaults.detour.reject_relative_prefix,
        decode_window: defaults.detour.decode_window,
    }
}

fn default_injection() -> InjectionConfig {
    let defaults = default_config();
    InjectionConfig {
        call_timeout_ms: defaults.injection.call_timeout_ms,
        inject_timeout_ms: defaults.injection.inject_timeout_ms,
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_config().logging.level,
    }
}

// Individual field defaults
fn default_max_string_bytes() -> usize {
    default_config().memory.max_string_bytes
}

fn default_allocation_protection() -> Protection {
    default_config().memory.allocation_protection
}

fn default_reject_relative_prefix() -> bool {
    default_config().detour.reject_relative_prefix
}

fn default_decode_window() -> usize {
    default_config().detour.decode_window
}

fn default_call_timeout_ms() -> Option<u64> {
    default_config().injection.call_timeout_ms
}

fn default_inject_timeout_ms() -> Option<u64> {
    default_config().injection.inject_timeout_ms
}

fn default_log_level() -> String {
    default_config().logging.level
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory: default_memory(),
            detour: default_detour(),
            injection: default_injection(),
            logging: default_logging(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        default_memory()
    }
}

impl Default for DetourConfig {
    fn default() -> Self {
        default_detour()
    }
}

impl Default for InjectionConfig {
    fn default() -> Self {
        default_injection()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        default_logging()
    }
}
