//! Error types for memory, detour and injection operations

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for every memedit operation
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Unsupported string encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Partial transfer at {address}: expected {expected} bytes, transferred {actual}")]
    PartialTransfer {
        address: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to allocate {size} bytes: {reason}")]
    AllocationFailed { size: usize, reason: String },

    #[error("{call} failed with OS error {code}")]
    OsCallFailed { call: String, code: u32 },

    #[error("Module already injected: {0}")]
    DuplicateModule(String),

    #[error("Inconsistent process state: {0}")]
    InconsistentState(String),

    #[error("Failed to eject module {0} from the remote process")]
    EjectFailed(String),

    #[error("Trampoline at {0} was never freed")]
    TrampolineLeak(String),

    #[error("Could not decode enough instructions at {address}: {decoded} of {required} bytes")]
    DisassemblyFailed {
        address: String,
        decoded: usize,
        required: usize,
    },

    #[error("Instruction `{instruction}` at {address} has a relative operand and cannot be relocated")]
    UnrelocatableInstruction { address: String, instruction: String },

    #[error("Jump from {from} to {to} does not fit a 32-bit displacement")]
    JumpOutOfRange { from: String, to: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Module injection failed: {0}")]
    InjectionFailed(String),

    #[error("Export {export} not found in {module}")]
    ExportNotFound { module: String, export: String },

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Creates an OS call failure carrying the OS error code
    pub fn os_call(call: impl Into<String>, code: u32) -> Self {
        MemoryError::OsCallFailed {
            call: call.into(),
            code,
        }
    }

    /// Creates a partial transfer error
    pub fn partial_transfer(address: impl fmt::Display, expected: usize, actual: usize) -> Self {
        MemoryError::PartialTransfer {
            address: address.to_string(),
            expected,
            actual,
        }
    }

    /// Creates an allocation failure
    pub fn allocation_failed(size: usize, reason: impl Into<String>) -> Self {
        MemoryError::AllocationFailed {
            size,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error
    pub fn buffer_too_small(expected: usize, actual: usize) -> Self {
        MemoryError::BufferTooSmall { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::os_call("VirtualAllocEx", 5);
        assert_eq!(err.to_string(), "VirtualAllocEx failed with OS error 5");

        let err = MemoryError::partial_transfer("0x1000", 8, 4);
        assert_eq!(
            err.to_string(),
            "Partial transfer at 0x1000: expected 8 bytes, transferred 4"
        );
    }

    #[test]
    fn test_all_error_variants() {
        let errors: Vec<(MemoryError, &str)> = vec![
            (
                MemoryError::UnsupportedType("u16 array".to_string()),
                "Unsupported type: u16 array",
            ),
            (
                MemoryError::UnsupportedEncoding("utf-7".to_string()),
                "Unsupported string encoding: utf-7",
            ),
            (
                MemoryError::allocation_failed(15, "out of memory"),
                "Failed to allocate 15 bytes: out of memory",
            ),
            (
                MemoryError::DuplicateModule("payload.dll".to_string()),
                "Module already injected: payload.dll",
            ),
            (
                MemoryError::EjectFailed("payload.dll".to_string()),
                "Failed to eject module payload.dll from the remote process",
            ),
            (
                MemoryError::TrampolineLeak("0x2000".to_string()),
                "Trampoline at 0x2000 was never freed",
            ),
            (
                MemoryError::FileNotFound(PathBuf::from("missing.dll")),
                "File not found: missing.dll",
            ),
            (
                MemoryError::ExportNotFound {
                    module: "payload.dll".to_string(),
                    export: "Run".to_string(),
                },
                "Export Run not found in payload.dll",
            ),
            (
                MemoryError::buffer_too_small(8, 2),
                "Buffer too small: expected 8, got 2",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: MemoryError = io_err.into();
        assert!(matches!(err, MemoryError::Io(_)));
    }

    #[test]
    fn test_helper_methods() {
        match MemoryError::os_call("OpenProcess", 87) {
            MemoryError::OsCallFailed { call, code } => {
                assert_eq!(call, "OpenProcess");
                assert_eq!(code, 87);
            }
            _ => panic!("Wrong error type"),
        }

        match MemoryError::partial_transfer("0xABCD", 4, 0) {
            MemoryError::PartialTransfer {
                address,
                expected,
                actual,
            } => {
                assert_eq!(address, "0xABCD");
                assert_eq!(expected, 4);
                assert_eq!(actual, 0);
            }
            _ => panic!("Wrong error type"),
        }
    }
}
