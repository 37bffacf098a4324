//! Core type definitions for memedit
//!
//! Addresses, the primitive codec, string encodings and the error type.

mod address;
mod encoding;
mod error;
pub mod primitive;

pub use address::Address;
pub use encoding::StringEncoding;
pub use error::{MemoryError, MemoryResult};
pub use primitive::{
    decode, encode, ArrayElement, Primitive, PrimitiveTag, PrimitiveValue, WideChar, CHAR_WIDTH,
};

// Common type aliases
pub type ProcessId = u32;
pub type ThreadId = u32;
