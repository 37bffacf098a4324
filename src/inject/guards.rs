//! Scoped release of foreign allocations, thread handles and local loads

use crate::core::types::{Address, MemoryResult};
use crate::process::{LoadMode, OsBackend, OsHandle, ProcessContext, WaitOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Memory allocated in a tracked process, freed on drop unless leaked
pub(crate) struct RemoteAllocation<'a> {
    context: &'a ProcessContext,
    address: Address,
    size: usize,
    leaked: bool,
}

impl<'a> RemoteAllocation<'a> {
    pub fn new(context: &'a ProcessContext, size: usize) -> MemoryResult<Self> {
        let address = context.allocate_buffer(size)?;
        Ok(RemoteAllocation {
            context,
            address,
            size,
            leaked: false,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Gives up ownership; the memory stays allocated in the foreign process
    pub fn leak(mut self) -> Address {
        self.leaked = true;
        warn!(
            pid = self.context.pid(),
            address = %self.address,
            size = self.size,
            "Leaving remote buffer allocated"
        );
        self.address
    }
}

impl Drop for RemoteAllocation<'_> {
    fn drop(&mut self) {
        if self.leaked {
            return;
        }
        if let Err(e) = self.context.free(self.address) {
            warn!(
                pid = self.context.pid(),
                address = %self.address,
                error = %e,
                "Failed to free remote buffer"
            );
        }
    }
}

/// A remote thread handle, closed on drop
pub(crate) struct ThreadHandle {
    os: Arc<dyn OsBackend>,
    handle: OsHandle,
}

impl ThreadHandle {
    pub fn new(os: Arc<dyn OsBackend>, handle: OsHandle) -> Self {
        ThreadHandle { os, handle }
    }

    pub fn wait(&self, timeout: Option<Duration>) -> MemoryResult<WaitOutcome> {
        self.os.wait_for_thread(self.handle, timeout)
    }

    pub fn exit_code(&self) -> MemoryResult<u32> {
        self.os.thread_exit_code(self.handle)
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if let Err(e) = self.os.close_handle(self.handle) {
            warn!(handle = %self.handle, error = %e, "Failed to close thread handle");
        }
    }
}

/// A module mapped into the calling process, unloaded on drop
pub(crate) struct LocalLibrary {
    os: Arc<dyn OsBackend>,
    base: Address,
}

impl LocalLibrary {
    pub fn load(os: Arc<dyn OsBackend>, path: &Path, mode: LoadMode) -> MemoryResult<Self> {
        let base = os.load_library(path, mode)?;
        Ok(LocalLibrary { os, base })
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn export(&self, name: &str) -> MemoryResult<Address> {
        self.os.export_address(self.base, name)
    }
}

impl Drop for LocalLibrary {
    fn drop(&mut self) {
        if let Err(e) = self.os.free_library(self.base) {
            warn!(base = %self.base, error = %e, "Failed to unload local module copy");
        }
    }
}
