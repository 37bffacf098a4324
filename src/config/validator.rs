//! Configuration validator for memedit
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::loader::{Config, ConfigError, DetourConfig, LoggingConfig, MemoryConfig};
use crate::disasm::MAX_INSTRUCTION_LENGTH;

/// Log levels accepted by the tracing filter
pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_memory(&config.memory)?;
        Self::validate_detour(&config.detour)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    /// Validates memory configuration
    fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
        // Must hold at least one wide terminator
        if memory.max_string_bytes < 2 {
            return Err(ConfigError::Invalid(
                "Maximum string bytes must be at least 2".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates detour configuration
    fn validate_detour(detour: &DetourConfig) -> Result<(), ConfigError> {
        if detour.decode_window < MAX_INSTRUCTION_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "Decode window must be at least {} bytes",
                MAX_INSTRUCTION_LENGTH
            )));
        }

        Ok(())
    }

    /// Validates logging configuration
    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, LOG_LEVELS
            )));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}
