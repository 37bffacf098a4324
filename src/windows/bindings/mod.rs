//! Windows API bindings
//!
//! Thin wrappers over the kernel32 calls the backend needs. Each wrapper
//! turns a failure into [`crate::core::types::MemoryError::OsCallFailed`].

pub mod kernel32;
