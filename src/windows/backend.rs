//! [`OsBackend`] on top of the Windows API

use super::bindings::kernel32;
use super::types::Handle;
use super::utils::{command_line, path_to_wide, string_to_wide};
use crate::core::types::{Address, MemoryResult, ProcessId, ThreadId};
use crate::memory::Protection;
use crate::process::{
    LoadMode, OsBackend, OsHandle, ProcessAccess, SpawnedProcess, Space, WaitOutcome,
};
use std::path::Path;
use std::time::Duration;
use tracing::trace;
use winapi::um::winnt::HANDLE;

/// The Windows implementation of [`OsBackend`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsOs;

impl WindowsOs {
    pub fn new() -> Self {
        WindowsOs
    }
}

fn raw(handle: OsHandle) -> HANDLE {
    handle.0 as HANDLE
}

fn space_handle(space: Space) -> Option<HANDLE> {
    match space {
        Space::Local => None,
        Space::Remote(handle) => Some(raw(handle)),
    }
}

/// Wait limit in milliseconds, clamped below INFINITE
fn timeout_ms(timeout: Option<Duration>) -> Option<u32> {
    timeout.map(|t| t.as_millis().min(u32::MAX as u128 - 1) as u32)
}

impl OsBackend for WindowsOs {
    fn current_process_id(&self) -> ProcessId {
        std::process::id()
    }

    fn open_process(&self, pid: ProcessId, access: ProcessAccess) -> MemoryResult<OsHandle> {
        let handle = kernel32::open_process(pid, access.value())?;
        Ok(OsHandle(handle as usize))
    }

    fn close_handle(&self, handle: OsHandle) -> MemoryResult<()> {
        unsafe { kernel32::close_handle(raw(handle)) }
    }

    fn allocate(
        &self,
        space: Space,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address> {
        let hint = hint.map_or(0, |hint| hint.as_usize());
        let address =
            unsafe { kernel32::virtual_alloc(space_handle(space), hint, size, protection.raw()) }?;
        trace!(?space, address = format_args!("0x{:X}", address), size, %protection, "VirtualAlloc");
        Ok(Address::new(address))
    }

    fn free(&self, space: Space, address: Address) -> MemoryResult<()> {
        unsafe { kernel32::virtual_free(space_handle(space), address.as_usize()) }
    }

    fn protect(
        &self,
        space: Space,
        address: Address,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Protection> {
        let previous = unsafe {
            kernel32::virtual_protect(space_handle(space), address.as_usize(), size, protection.raw())
        }?;
        Ok(Protection::from_raw(previous))
    }

    fn read_process_memory(
        &self,
        process: OsHandle,
        address: Address,
        buffer: &mut [u8],
    ) -> MemoryResult<usize> {
        unsafe { kernel32::read_process_memory(raw(process), address.as_usize(), buffer) }
    }

    fn write_process_memory(
        &self,
        process: OsHandle,
        address: Address,
        data: &[u8],
    ) -> MemoryResult<usize> {
        unsafe { kernel32::write_process_memory(raw(process), address.as_usize(), data) }
    }

    fn flush_instruction_cache(
        &self,
        space: Space,
        address: Address,
        size: usize,
    ) -> MemoryResult<()> {
        unsafe { kernel32::flush_instruction_cache(space_handle(space), address.as_usize(), size) }
    }

    fn create_remote_thread(
        &self,
        process: OsHandle,
        entry: Address,
        argument: Address,
    ) -> MemoryResult<OsHandle> {
        let thread = unsafe {
            kernel32::create_remote_thread(raw(process), entry.as_usize(), argument.as_usize())
        }?;
        Ok(OsHandle(thread as usize))
    }

    fn wait_for_thread(
        &self,
        thread: OsHandle,
        timeout: Option<Duration>,
    ) -> MemoryResult<WaitOutcome> {
        let signaled = unsafe { kernel32::wait_for_thread(raw(thread), timeout_ms(timeout)) }?;
        Ok(if signaled {
            WaitOutcome::Signaled
        } else {
            WaitOutcome::TimedOut
        })
    }

    fn thread_exit_code(&self, thread: OsHandle) -> MemoryResult<u32> {
        unsafe { kernel32::thread_exit_code(raw(thread)) }
    }

    fn module_handle(&self, name: &str) -> MemoryResult<Address> {
        kernel32::module_handle(&string_to_wide(name)).map(Address::new)
    }

    fn load_library(&self, path: &Path, mode: LoadMode) -> MemoryResult<Address> {
        let map_only = mode == LoadMode::DontResolveReferences;
        unsafe { kernel32::load_library(&path_to_wide(path), map_only) }.map(Address::new)
    }

    fn free_library(&self, module: Address) -> MemoryResult<()> {
        unsafe { kernel32::free_library(module.as_usize()) }
    }

    fn export_address(&self, module: Address, name: &str) -> MemoryResult<Address> {
        unsafe { kernel32::proc_address(module.as_usize(), name) }.map(Address::new)
    }

    fn is_process_running(&self, process: OsHandle) -> MemoryResult<bool> {
        unsafe { kernel32::is_process_running(raw(process)) }
    }

    fn create_process_suspended(
        &self,
        path: &Path,
        args: &[String],
    ) -> MemoryResult<SpawnedProcess> {
        let mut line = command_line(path, args);
        let (pid, main_thread_id) =
            kernel32::create_process_suspended(&path_to_wide(path), &mut line)?;
        Ok(SpawnedProcess {
            pid,
            main_thread_id,
        })
    }

    fn resume_thread(&self, thread_id: ThreadId) -> MemoryResult<()> {
        let thread = Handle::new(kernel32::open_thread_for_resume(thread_id)?);
        unsafe { kernel32::resume_thread(thread.raw()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MemoryError;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ms(None), None);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), Some(250));
        assert_eq!(
            timeout_ms(Some(Duration::from_secs(u64::MAX))),
            Some(u32::MAX - 1)
        );
    }

    #[test]
    fn test_remote_round_trip_on_own_process() {
        let os = WindowsOs::new();
        let handle = os
            .open_process(os.current_process_id(), ProcessAccess::standard())
            .unwrap();
        let space = Space::Remote(handle);
        let address = os.allocate(space, None, 16, Protection::read_write()).unwrap();

        assert_eq!(os.write_process_memory(handle, address, &[1, 2, 3, 4]).unwrap(), 4);
        let mut buffer = [0u8; 4];
        assert_eq!(os.read_process_memory(handle, address, &mut buffer).unwrap(), 4);
        assert_eq!(buffer, [1, 2, 3, 4]);

        let previous = os.protect(space, address, 16, Protection::read_only()).unwrap();
        assert_eq!(previous, Protection::read_write());

        os.free(space, address).unwrap();
        os.close_handle(handle).unwrap();
    }

    #[test]
    fn test_module_lookup() {
        let os = WindowsOs::new();
        let kernel32 = os.module_handle("kernel32.dll").unwrap();
        assert!(!os.export_address(kernel32, "FreeLibrary").unwrap().is_null());
        assert!(matches!(
            os.module_handle("no_such_module.dll"),
            Err(MemoryError::OsCallFailed { code: 126, .. })
        ));
    }

    #[test]
    fn test_own_process_is_running() {
        let os = WindowsOs::new();
        let handle = os
            .open_process(os.current_process_id(), ProcessAccess::QUERY_INFORMATION)
            .unwrap();
        assert!(os.is_process_running(handle).unwrap());
        os.close_handle(handle).unwrap();
    }
}
