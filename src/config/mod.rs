//! Configuration module for memedit
//!
//! Provides configuration loading, validation, and default settings
//! for the accessors, the detour engine and injection.

mod defaults;
mod loader;
mod validator;

pub use defaults::{default_config, ConfigDefaults};
pub use loader::{
    load_config, Config, ConfigLoader, DetourConfig, InjectionConfig, LoggingConfig, MemoryConfig,
};
pub use validator::{validate_config, ConfigValidator, LOG_LEVELS};

// Configuration-related error type
pub use loader::ConfigError;

// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_pass_validation() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert!(LOG_LEVELS.contains(&config.logging.level.as_str()));
    }

    #[test]
    fn test_injection_timeouts() {
        let mut config = Config::default();
        config.injection.call_timeout_ms = Some(1500);
        config.injection.inject_timeout_ms = None;

        assert_eq!(
            config.injection.call_timeout(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.injection.inject_timeout(), None);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let result: ConfigResult<Config> = Err(ConfigError::Invalid(
            "decode_window must be at least 15".to_string(),
        ));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
