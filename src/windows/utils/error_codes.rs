//! Windows error code handling utilities

use crate::core::types::MemoryError;
use std::fmt;
use tracing::debug;
use winapi::um::errhandlingapi::GetLastError;

/// Windows error codes the backend runs into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    AccessDenied,
    InvalidHandle,
    InvalidParameter,
    ModNotFound,
    ProcNotFound,
    PartialCopy,
    InvalidAddress,
    NoAccess,
    Unknown(u32),
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ErrorCode::Success,
            5 => ErrorCode::AccessDenied,
            6 => ErrorCode::InvalidHandle,
            87 => ErrorCode::InvalidParameter,
            126 => ErrorCode::ModNotFound,
            127 => ErrorCode::ProcNotFound,
            299 => ErrorCode::PartialCopy,
            487 => ErrorCode::InvalidAddress,
            998 => ErrorCode::NoAccess,
            _ => ErrorCode::Unknown(code),
        }
    }
}

impl ErrorCode {
    /// Get the last Windows error
    pub fn last_error() -> Self {
        unsafe { ErrorCode::from(GetLastError()) }
    }

    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::AccessDenied => 5,
            ErrorCode::InvalidHandle => 6,
            ErrorCode::InvalidParameter => 87,
            ErrorCode::ModNotFound => 126,
            ErrorCode::ProcNotFound => 127,
            ErrorCode::PartialCopy => 299,
            ErrorCode::InvalidAddress => 487,
            ErrorCode::NoAccess => 998,
            ErrorCode::Unknown(code) => *code,
        }
    }

    /// System message text for the code
    pub fn message(&self) -> String {
        windows::core::HRESULT::from_win32(self.code())
            .message()
            .to_string()
            .trim_end()
            .to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "Success"),
            ErrorCode::AccessDenied => write!(f, "Access denied"),
            ErrorCode::InvalidHandle => write!(f, "Invalid handle"),
            ErrorCode::InvalidParameter => write!(f, "Invalid parameter"),
            ErrorCode::ModNotFound => write!(f, "Module not found"),
            ErrorCode::ProcNotFound => write!(f, "Procedure not found"),
            ErrorCode::PartialCopy => write!(f, "Partial copy"),
            ErrorCode::InvalidAddress => write!(f, "Invalid address"),
            ErrorCode::NoAccess => write!(f, "Invalid access to memory location"),
            ErrorCode::Unknown(code) => write!(f, "Unknown error: {}", code),
        }
    }
}

/// The last Windows error of `call` as a [`MemoryError`]
pub fn last_error_as_memory_error(call: &str) -> MemoryError {
    let code = ErrorCode::last_error();
    debug!(call, code = code.code(), message = %code.message(), "Windows API call failed");
    MemoryError::os_call(call, code.code())
}
