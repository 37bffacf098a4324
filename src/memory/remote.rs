//! Cross-process memory access through an open process handle

use super::{MemoryAccess, Protection, DEFAULT_MAX_STRING_BYTES};
use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::process::ProcessHandle;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Accessor for a foreign address space
#[derive(Clone)]
pub struct RemoteMemory {
    handle: Arc<ProcessHandle>,
    max_string_bytes: usize,
}

impl RemoteMemory {
    pub fn new(handle: Arc<ProcessHandle>) -> Self {
        RemoteMemory {
            handle,
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
        }
    }

    /// Sets the bound used by default string reads
    pub fn with_max_string_bytes(mut self, max_string_bytes: usize) -> Self {
        self.max_string_bytes = max_string_bytes;
        self
    }

    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }
}

impl MemoryAccess for RemoteMemory {
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()> {
        let read = self
            .handle
            .os()
            .read_process_memory(self.handle.raw(), address, buffer)?;
        trace!(pid = self.handle.pid(), %address, len = buffer.len(), read, "Remote read");
        if read != buffer.len() {
            return Err(MemoryError::partial_transfer(address, buffer.len(), read));
        }
        Ok(())
    }

    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        let written = self
            .handle
            .os()
            .write_process_memory(self.handle.raw(), address, data)?;
        trace!(pid = self.handle.pid(), %address, len = data.len(), written, "Remote write");
        if written != data.len() {
            return Err(MemoryError::partial_transfer(address, data.len(), written));
        }
        Ok(())
    }

    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address> {
        self.handle
            .os()
            .allocate(self.handle.space(), hint, size, protection)
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        self.handle.os().free(self.handle.space(), address)
    }

    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Protection> {
        self.handle
            .os()
            .protect(self.handle.space(), address, size, protection)
    }

    fn flush_instruction_cache(&self, address: Address, size: usize) -> MemoryResult<()> {
        self.handle
            .os()
            .flush_instruction_cache(self.handle.space(), address, size)
    }

    fn max_string_bytes(&self) -> usize {
        self.max_string_bytes
    }
}

impl fmt::Debug for RemoteMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMemory")
            .field("handle", &self.handle)
            .field("max_string_bytes", &self.max_string_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PrimitiveTag, StringEncoding};
    use crate::process::fake::FakeOs;

    fn accessor() -> (Arc<FakeOs>, RemoteMemory) {
        let fake = Arc::new(FakeOs::new());
        let handle = ProcessHandle::open_standard(fake.clone(), 4242).unwrap();
        (fake, RemoteMemory::new(Arc::new(handle)))
    }

    #[test]
    fn test_remote_write_read_u32() {
        let (fake, memory) = accessor();
        let address = memory.allocate(None, 4, Protection::read_write()).unwrap();
        memory.write::<u32>(address, 0xDEADBEEF).unwrap();
        assert_eq!(memory.read::<u32>(address).unwrap(), 0xDEADBEEF);
        memory.free(address).unwrap();
        assert_eq!(fake.live_allocations(), 0);
    }

    #[test]
    fn test_partial_read_reported() {
        let (fake, memory) = accessor();
        let address = memory.allocate(None, 8, Protection::read_write()).unwrap();
        fake.set_transfer_limit(Some(3));

        match memory.read::<u64>(address).unwrap_err() {
            MemoryError::PartialTransfer {
                expected, actual, ..
            } => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 3);
            }
            _ => panic!("Expected PartialTransfer error"),
        }
    }

    #[test]
    fn test_partial_write_reported() {
        let (fake, memory) = accessor();
        let address = memory.allocate(None, 8, Protection::read_write()).unwrap();
        fake.set_transfer_limit(Some(0));
        let result = memory.write_string(address, "abc", StringEncoding::Ascii, true);
        assert!(matches!(
            result,
            Err(MemoryError::PartialTransfer {
                expected: 4,
                actual: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_os_failure_propagates() {
        let (_fake, memory) = accessor();
        let result = memory.read_value(Address::null(), PrimitiveTag::I32);
        assert!(matches!(result, Err(MemoryError::OsCallFailed { .. })));
    }

    #[test]
    fn test_string_read_consumes_max_bytes() {
        let (fake, memory) = accessor();
        let memory = memory.with_max_string_bytes(32);
        let address = memory.allocate(None, 32, Protection::read_write()).unwrap();
        memory
            .write_string(address, "hi", StringEncoding::Utf16, true)
            .unwrap();

        fake.set_transfer_limit(Some(31));
        assert!(memory
            .read_string_default(address, StringEncoding::Utf16)
            .is_err());

        fake.set_transfer_limit(None);
        assert_eq!(
            memory
                .read_string_default(address, StringEncoding::Utf16)
                .unwrap(),
            "hi"
        );
    }
}
