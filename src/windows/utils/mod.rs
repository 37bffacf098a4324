//! Windows utility functions

pub mod error_codes;
pub mod string_conv;

// Re-export commonly used utilities
pub use error_codes::{last_error_as_memory_error, ErrorCode};
pub use string_conv::{command_line, path_to_wide, quote_argument, string_to_wide};
