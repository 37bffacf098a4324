//! Code edits: function detours and byte patches
//!
//! Edits are tracked per process in an [`EditRegistry`]. Going through
//! [`ProcessContext::detour`] or [`ProcessContext::patch`] guarantees at most
//! one live edit per address.

pub mod edit;
pub mod engine;
pub mod function;
pub mod jump;
pub mod patch;
pub mod registry;

pub use edit::MemoryEdit;
pub use engine::Detour;
pub use function::Function;
pub use jump::{encode_jump, JUMP_SIZE};
pub use patch::BytePatch;
pub use registry::{EditRegistry, SharedEdit};

use crate::core::types::{Address, MemoryResult};
use crate::memory::RemoteMemory;
use crate::process::ProcessContext;
use std::sync::Arc;

impl ProcessContext {
    /// Detours `target` to `replacement` in the calling process and tracks
    /// the detour. An existing edit at the target is reverted first.
    pub fn detour<F: Function>(&self, target: F, replacement: F) -> MemoryResult<Arc<Detour<F>>> {
        // SAFETY: a function pointer's entry is mapped executable code
        let memory = unsafe { self.local_memory()? };
        let config = self.config().detour.clone();
        self.install_edit(target.to_address(), || {
            Detour::with_config(memory, target, replacement, config)
        })
    }

    /// Overwrites bytes at `address` and tracks the patch
    pub fn patch(&self, address: Address, bytes: Vec<u8>) -> MemoryResult<Arc<BytePatch<RemoteMemory>>> {
        let memory = self.memory()?;
        self.install_edit(address, || BytePatch::new(memory, address, bytes))
    }
}
