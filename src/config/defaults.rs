//! Default configuration values for memedit

use crate::disasm::DEFAULT_DECODE_WINDOW;
use crate::memory::Protection;
use serde::{Deserialize, Serialize};

/// Default configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub memory: MemoryDefaults,
    pub detour: DetourDefaults,
    pub injection: InjectionDefaults,
    pub logging: LoggingDefaults,
}

/// Default memory accessor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDefaults {
    pub max_string_bytes: usize,
    pub allocation_protection: Protection,
}

/// Default detour engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetourDefaults {
    pub reject_relative_prefix: bool,
    pub decode_window: usize,
}

/// Default injection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionDefaults {
    pub call_timeout_ms: Option<u64>,
    pub inject_timeout_ms: Option<u64>,
}

/// Default logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingDefaults {
    pub level: String,
}

/// Returns the default configuration
pub fn default_config() -> ConfigDefaults {
    ConfigDefaults {
        memory: MemoryDefaults {
            max_string_bytes: 1024,
            allocation_protection: Protection::read_write(),
        },
        detour: DetourDefaults {
            reject_relative_prefix: true,
            decode_window: DEFAULT_DECODE_WINDOW,
        },
        injection: InjectionDefaults {
            call_timeout_ms: None,
            inject_timeout_ms: None,
        },
        logging: LoggingDefaults {
            level: "info".to_string(),
        },
    }
}
