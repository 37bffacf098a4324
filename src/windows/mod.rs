//! Windows API layer
//!
//! [`WindowsOs`] implements the OS seam with kernel32. All unsafe FFI calls
//! are contained within this module.

pub mod backend;
pub mod bindings;
pub mod types;
pub mod utils;

pub use backend::WindowsOs;
pub use types::Handle;
pub use utils::ErrorCode;
