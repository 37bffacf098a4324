//! Reversible edits of live memory

use crate::core::types::{Address, MemoryResult};
use crate::memory::{MemoryAccess, Protection};
use tracing::{debug, warn};

/// A reversible change to process memory at one address
pub trait MemoryEdit: Send + Sync {
    /// Address the edit overwrites
    fn address(&self) -> Address;

    fn is_applied(&self) -> bool;

    /// Applies the edit; a no-op when already applied
    fn apply(&self) -> MemoryResult<()>;

    /// Reverts the edit; a no-op when not applied
    fn remove(&self) -> MemoryResult<()>;

    /// Reverts the edit during teardown, logging instead of failing
    fn dispose(&self) {
        if let Err(e) = self.remove() {
            warn!(address = %self.address(), error = %e, "Failed to revert memory edit");
        }
    }
}

/// Overwrites code bytes: makes the range writable, writes, restores the old
/// protection, then flushes the instruction cache.
pub(crate) fn write_code<M: MemoryAccess + ?Sized>(
    memory: &M,
    address: Address,
    bytes: &[u8],
) -> MemoryResult<()> {
    debug!(%address, bytes = %hex::encode(bytes), "Writing code");
    let previous = memory.protect(address, bytes.len(), Protection::execute_read_write())?;
    let written = memory.write_bytes(address, bytes);
    let restored = memory.protect(address, bytes.len(), previous);
    written?;
    if let Err(e) = restored {
        warn!(%address, error = %e, "Failed to restore page protection");
    }
    memory.flush_instruction_cache(address, bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LocalMemory;
    use crate::process::fake::FakeOs;
    use std::sync::Arc;

    #[test]
    fn test_write_code_protects_and_flushes() {
        let fake = Arc::new(FakeOs::new());
        let memory = unsafe { LocalMemory::new(fake.clone()) };
        let address = memory.allocate(None, 8, Protection::execute_read()).unwrap();

        write_code(&memory, address, &[0xCC, 0xCC]).unwrap();

        assert_eq!(memory.read_vec(address, 2).unwrap(), vec![0xCC, 0xCC]);
        assert_eq!(
            fake.protect_log(),
            vec![
                (address, Protection::execute_read_write()),
                (address, Protection::execute_read()),
            ]
        );
        assert_eq!(fake.flushes(), vec![(address, 2)]);
    }
}
