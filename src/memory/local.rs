//! Direct access to the calling process's own memory

use super::{MemoryAccess, Protection, DEFAULT_MAX_STRING_BYTES};
use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::process::os::{OsBackend, Space};
use std::fmt;
use std::ptr;
use std::sync::Arc;

/// Accessor for the caller's address space by direct dereference
#[derive(Clone)]
pub struct LocalMemory {
    os: Arc<dyn OsBackend>,
    max_string_bytes: usize,
}

impl LocalMemory {
    /// Creates a local accessor.
    ///
    /// # Safety
    /// Reads and writes dereference the given addresses directly. The caller
    /// guarantees every address passed to this accessor is mapped with the
    /// access the operation needs for the full length of the transfer.
    pub unsafe fn new(os: Arc<dyn OsBackend>) -> Self {
        LocalMemory {
            os,
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
        }
    }

    /// Sets the bound used by default string reads
    pub fn with_max_string_bytes(mut self, max_string_bytes: usize) -> Self {
        self.max_string_bytes = max_string_bytes;
        self
    }

    pub fn os(&self) -> &Arc<dyn OsBackend> {
        &self.os
    }

    fn check(address: Address, len: usize) -> MemoryResult<()> {
        if address.is_null() && len > 0 {
            return Err(MemoryError::InvalidAddress(address.to_string()));
        }
        Ok(())
    }
}

impl MemoryAccess for LocalMemory {
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()> {
        Self::check(address, buffer.len())?;
        // SAFETY: the constructor's contract covers every address passed in
        unsafe {
            ptr::copy_nonoverlapping(address.as_ptr::<u8>(), buffer.as_mut_ptr(), buffer.len());
        }
        Ok(())
    }

    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        Self::check(address, data.len())?;
        // SAFETY: the constructor's contract covers every address passed in
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), address.as_mut_ptr::<u8>(), data.len());
        }
        Ok(())
    }

    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address> {
        self.os.allocate(Space::Local, hint, size, protection)
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        self.os.free(Space::Local, address)
    }

    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Protection> {
        self.os.protect(Space::Local, address, size, protection)
    }

    fn flush_instruction_cache(&self, address: Address, size: usize) -> MemoryResult<()> {
        self.os.flush_instruction_cache(Space::Local, address, size)
    }

    fn max_string_bytes(&self) -> usize {
        self.max_string_bytes
    }
}

impl fmt::Debug for LocalMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMemory")
            .field("max_string_bytes", &self.max_string_bytes)
            .finish()
    }
}
