//! Raw byte patches with saved originals

use super::edit::{write_code, MemoryEdit};
use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::memory::MemoryAccess;
use parking_lot::Mutex;
use std::fmt;
use tracing::info;

/// Overwrites bytes at an address, keeping the originals for restoration
pub struct BytePatch<M: MemoryAccess> {
    memory: M,
    address: Address,
    replacement: Vec<u8>,
    original: Vec<u8>,
    applied: Mutex<bool>,
}

impl<M: MemoryAccess> BytePatch<M> {
    /// Captures the current bytes at `address`; nothing is written yet
    pub fn new(memory: M, address: Address, replacement: Vec<u8>) -> MemoryResult<Self> {
        if replacement.is_empty() {
            return Err(MemoryError::buffer_too_small(1, 0));
        }
        let original = memory.read_vec(address, replacement.len())?;
        Ok(BytePatch {
            memory,
            address,
            replacement,
            original,
            applied: Mutex::new(false),
        })
    }

    /// Bytes that were present before the patch
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }
}

impl<M: MemoryAccess> MemoryEdit for BytePatch<M> {
    fn address(&self) -> Address {
        self.address
    }

    fn is_applied(&self) -> bool {
        *self.applied.lock()
    }

    fn apply(&self) -> MemoryResult<()> {
        let mut applied = self.applied.lock();
        if *applied {
            return Ok(());
        }
        write_code(&self.memory, self.address, &self.replacement)?;
        *applied = true;
        info!(address = %self.address, len = self.replacement.len(), "Byte patch applied");
        Ok(())
    }

    fn remove(&self) -> MemoryResult<()> {
        let mut applied = self.applied.lock();
        if !*applied {
            return Ok(());
        }
        write_code(&self.memory, self.address, &self.original)?;
        *applied = false;
        info!(address = %self.address, "Byte patch removed");
        Ok(())
    }
}

impl<M: MemoryAccess> Drop for BytePatch<M> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<M: MemoryAccess> fmt::Debug for BytePatch<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytePatch")
            .field("address", &self.address)
            .field("replacement", &hex::encode(&self.replacement))
            .field("original", &hex::encode(&self.original))
            .field("applied", &self.is_applied())
            .finish()
    }
}
