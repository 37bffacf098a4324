//! Core module containing the fundamental types shared by every subsystem
//!
//! Address handling, the primitive codec, string encodings and errors.

pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    Address, MemoryError, MemoryResult, Primitive, PrimitiveTag, PrimitiveValue, StringEncoding,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
