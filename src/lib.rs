//! memedit: typed process memory access, function detours and module
//! injection for Windows processes

pub mod config;
pub mod core;
pub mod detour;
pub mod disasm;
pub mod inject;
pub mod logging;
pub mod memory;
pub mod process;
#[cfg(windows)]
pub mod windows;

// Re-export main types from core module
pub use crate::core::types::{
    Address, MemoryError, MemoryResult, Primitive, PrimitiveTag, PrimitiveValue, ProcessId,
    StringEncoding, ThreadId, WideChar,
};

pub use config::Config;
pub use detour::{BytePatch, Detour, EditRegistry, Function, MemoryEdit};
pub use inject::{InjectedModule, ParameterBlock, RemoteCall, RemoteStruct};
pub use memory::{LocalMemory, MemoryAccess, Protection, RemoteMemory};
pub use process::{OsBackend, ProcessContext, ProcessRegistry};

// Re-export core directly for full access
pub use crate::core::*;
