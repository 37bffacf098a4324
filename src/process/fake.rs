//! Scripted in-process OS backend for unit tests
//!
//! Allocations come from one real heap arena so local accessors, code patches
//! and trampolines can be exercised without a second process. "Remote" memory
//! is the same address space.

use super::os::{LoadMode, OsBackend, OsHandle, ProcessAccess, SpawnedProcess, Space, WaitOutcome};
use crate::core::types::{Address, MemoryError, MemoryResult, ProcessId, ThreadId};
use crate::memory::Protection;
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ARENA_SIZE: usize = 64 * 1024;
const ARENA_ALIGN: usize = 16;

/// A thread started through [`OsBackend::create_remote_thread`]
#[derive(Debug, Clone)]
pub(crate) struct RemoteThread {
    pub entry: Address,
    pub argument: Address,
    /// Contents of the argument's allocation when the thread started
    pub argument_bytes: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<&'static str>,
    next_handle: usize,
    next_offset: usize,
    allocations: HashMap<usize, usize>,
    protections: HashMap<usize, Protection>,
    protect_log: Vec<(Address, Protection)>,
    flushes: Vec<(Address, usize)>,
    handles: HashMap<usize, ProcessId>,
    threads: HashMap<usize, Address>,
    remote_threads: Vec<RemoteThread>,
    thread_exit_codes: HashMap<Address, u32>,
    hanging_entries: HashSet<Address>,
    modules: HashMap<String, Address>,
    libraries: HashMap<PathBuf, Address>,
    library_loads: Vec<(PathBuf, LoadMode)>,
    loaded_libraries: usize,
    exports: HashMap<(Address, String), Address>,
    exited: HashSet<ProcessId>,
    unopenable: HashSet<ProcessId>,
    transfer_limit: Option<usize>,
    fail_allocations: bool,
    fail_frees: bool,
    fail_protect: bool,
    next_pid: ProcessId,
    resumed: Vec<ThreadId>,
}

pub(crate) struct FakeOs {
    pid: ProcessId,
    arena: usize,
    state: Mutex<FakeState>,
}

impl FakeOs {
    pub fn new() -> Self {
        Self::with_pid(std::process::id())
    }

    pub fn with_pid(pid: ProcessId) -> Self {
        let layout = Self::arena_layout();
        // SAFETY: the layout has a non-zero size
        let arena = unsafe { alloc_zeroed(layout) } as usize;
        assert!(arena != 0, "fake arena allocation failed");
        FakeOs {
            pid,
            arena,
            state: Mutex::new(FakeState {
                next_handle: 0x100,
                next_pid: 0x4000,
                ..FakeState::default()
            }),
        }
    }

    fn arena_layout() -> Layout {
        Layout::from_size_align(ARENA_SIZE, ARENA_ALIGN).expect("valid arena layout")
    }

    /// Names of every backend call, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.handles.len() + state.threads.len()
    }

    pub fn remote_threads(&self) -> Vec<RemoteThread> {
        self.state.lock().remote_threads.clone()
    }

    pub fn protect_log(&self) -> Vec<(Address, Protection)> {
        self.state.lock().protect_log.clone()
    }

    pub fn flushes(&self) -> Vec<(Address, usize)> {
        self.state.lock().flushes.clone()
    }

    pub fn library_loads(&self) -> Vec<(PathBuf, LoadMode)> {
        self.state.lock().library_loads.clone()
    }

    pub fn loaded_libraries(&self) -> usize {
        self.state.lock().loaded_libraries
    }

    pub fn resumed_threads(&self) -> Vec<ThreadId> {
        self.state.lock().resumed.clone()
    }

    pub fn add_module(&self, name: &str, base: Address) {
        self.state.lock().modules.insert(name.to_ascii_lowercase(), base);
    }

    pub fn add_library(&self, path: &Path, base: Address) {
        self.state.lock().libraries.insert(path.to_path_buf(), base);
    }

    pub fn add_export(&self, module: Address, name: &str, address: Address) {
        self.state
            .lock()
            .exports
            .insert((module, name.to_string()), address);
    }

    /// Exit code reported by threads started at `entry`
    pub fn set_thread_exit_code(&self, entry: Address, code: u32) {
        self.state.lock().thread_exit_codes.insert(entry, code);
    }

    /// Threads started at `entry` never finish within a timeout
    pub fn hang_threads_at(&self, entry: Address) {
        self.state.lock().hanging_entries.insert(entry);
    }

    pub fn set_exited(&self, pid: ProcessId) {
        self.state.lock().exited.insert(pid);
    }

    pub fn set_unopenable(&self, pid: ProcessId) {
        self.state.lock().unopenable.insert(pid);
    }

    /// Caps how many bytes a single cross-process transfer moves
    pub fn set_transfer_limit(&self, limit: Option<usize>) {
        self.state.lock().transfer_limit = limit;
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }

    pub fn fail_frees(&self, fail: bool) {
        self.state.lock().fail_frees = fail;
    }

    pub fn fail_protect(&self, fail: bool) {
        self.state.lock().fail_protect = fail;
    }

    fn allocation_containing(state: &FakeState, address: usize) -> Option<(usize, usize)> {
        state
            .allocations
            .iter()
            .find(|(&base, &size)| address >= base && address < base + size)
            .map(|(&base, &size)| (base, size))
    }

    fn next_handle(state: &mut FakeState) -> usize {
        state.next_handle += 4;
        state.next_handle
    }
}

impl Drop for FakeOs {
    fn drop(&mut self) {
        // SAFETY: the arena was allocated in `with_pid` with the same layout
        unsafe { dealloc(self.arena as *mut u8, Self::arena_layout()) };
    }
}

impl OsBackend for FakeOs {
    fn current_process_id(&self) -> ProcessId {
        self.pid
    }

    fn open_process(&self, pid: ProcessId, _access: ProcessAccess) -> MemoryResult<OsHandle> {
        let mut state = self.state.lock();
        state.calls.push("open_process");
        if state.unopenable.contains(&pid) {
            return Err(MemoryError::os_call("OpenProcess", 87));
        }
        let handle = Self::next_handle(&mut state);
        state.handles.insert(handle, pid);
        Ok(OsHandle(handle))
    }

    fn close_handle(&self, handle: OsHandle) -> MemoryResult<()> {
        let mut state = self.state.lock();
        state.calls.push("close_handle");
        if state.handles.remove(&handle.0).is_some() || state.threads.remove(&handle.0).is_some()
        {
            Ok(())
        } else {
            Err(MemoryError::InvalidHandle(handle.to_string()))
        }
    }

    fn allocate(
        &self,
        _space: Space,
        _hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address> {
        let mut state = self.state.lock();
        state.calls.push("allocate");
        let rounded = (size.max(1) + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1);
        if state.fail_allocations || state.next_offset + rounded > ARENA_SIZE {
            return Err(MemoryError::allocation_failed(size, "fake arena exhausted"));
        }
        let base = self.arena + state.next_offset;
        state.next_offset += rounded;
        state.allocations.insert(base, size);
        state.protections.insert(base, protection);
        Ok(Address::new(base))
    }

    fn free(&self, _space: Space, address: Address) -> MemoryResult<()> {
        let mut state = self.state.lock();
        state.calls.push("free");
        if state.fail_frees {
            return Err(MemoryError::os_call("VirtualFree", 5));
        }
        state
            .allocations
            .remove(&address.as_usize())
            .map(|_| ())
            .ok_or_else(|| MemoryError::os_call("VirtualFree", 487))
    }

    fn protect(
        &self,
        _space: Space,
        address: Address,
        _size: usize,
        protection: Protection,
    ) -> MemoryResult<Protection> {
        let mut state = self.state.lock();
        state.calls.push("protect");
        if state.fail_protect {
            return Err(MemoryError::os_call("VirtualProtect", 487));
        }
        state.protect_log.push((address, protection));
        let previous = state
            .protections
            .insert(address.as_usize(), protection)
            .unwrap_or_else(Protection::execute_read);
        Ok(previous)
    }

    fn read_process_memory(
        &self,
        _process: OsHandle,
        address: Address,
        buffer: &mut [u8],
    ) -> MemoryResult<usize> {
        let mut state = self.state.lock();
        state.calls.push("read_process_memory");
        if address.is_null() {
            return Err(MemoryError::os_call("ReadProcessMemory", 299));
        }
        let count = state.transfer_limit.unwrap_or(buffer.len()).min(buffer.len());
        // SAFETY: tests only hand out addresses of live buffers
        unsafe { std::ptr::copy_nonoverlapping(address.as_ptr::<u8>(), buffer.as_mut_ptr(), count) };
        Ok(count)
    }

    fn write_process_memory(
        &self,
        _process: OsHandle,
        address: Address,
        data: &[u8],
    ) -> MemoryResult<usize> {
        let mut state = self.state.lock();
        state.calls.push("write_process_memory");
        if address.is_null() {
            return Err(MemoryError::os_call("WriteProcessMemory", 998));
        }
        let count = state.transfer_limit.unwrap_or(data.len()).min(data.len());
        // SAFETY: tests only hand out addresses of live buffers
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), address.as_mut_ptr::<u8>(), count) };
        Ok(count)
    }

    fn flush_instruction_cache(
        &self,
        _space: Space,
        address: Address,
        size: usize,
    ) -> MemoryResult<()> {
        let mut state = self.state.lock();
        state.calls.push("flush_instruction_cache");
        state.flushes.push((address, size));
        Ok(())
    }

    fn create_remote_thread(
        &self,
        _process: OsHandle,
        entry: Address,
        argument: Address,
    ) -> MemoryResult<OsHandle> {
        let mut state = self.state.lock();
        state.calls.push("create_remote_thread");
        let argument_bytes = match Self::allocation_containing(&state, argument.as_usize()) {
            Some((base, size)) => {
                let len = base + size - argument.as_usize();
                // SAFETY: the range lies inside a live arena allocation
                unsafe { std::slice::from_raw_parts(argument.as_ptr::<u8>(), len) }.to_vec()
            }
            None => Vec::new(),
        };
        state.remote_threads.push(RemoteThread {
            entry,
            argument,
            argument_bytes,
        });
        let handle = Self::next_handle(&mut state);
        state.threads.insert(handle, entry);
        Ok(OsHandle(handle))
    }

    fn wait_for_thread(
        &self,
        thread: OsHandle,
        timeout: Option<Duration>,
    ) -> MemoryResult<WaitOutcome> {
        let mut state = self.state.lock();
        state.calls.push("wait_for_thread");
        let entry = *state
            .threads
            .get(&thread.0)
            .ok_or_else(|| MemoryError::InvalidHandle(thread.to_string()))?;
        if timeout.is_some() && state.hanging_entries.contains(&entry) {
            Ok(WaitOutcome::TimedOut)
        } else {
            Ok(WaitOutcome::Signaled)
        }
    }

    fn thread_exit_code(&self, thread: OsHandle) -> MemoryResult<u32> {
        let mut state = self.state.lock();
        state.calls.push("thread_exit_code");
        let entry = *state
            .threads
            .get(&thread.0)
            .ok_or_else(|| MemoryError::InvalidHandle(thread.to_string()))?;
        Ok(state.thread_exit_codes.get(&entry).copied().unwrap_or(0))
    }

    fn module_handle(&self, name: &str) -> MemoryResult<Address> {
        let mut state = self.state.lock();
        state.calls.push("module_handle");
        state
            .modules
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| MemoryError::os_call("GetModuleHandleW", 126))
    }

    fn load_library(&self, path: &Path, mode: LoadMode) -> MemoryResult<Address> {
        let mut state = self.state.lock();
        state.calls.push("load_library");
        state.library_loads.push((path.to_path_buf(), mode));
        let base = state
            .libraries
            .get(path)
            .copied()
            .ok_or_else(|| MemoryError::os_call("LoadLibraryExW", 126))?;
        state.loaded_libraries += 1;
        Ok(base)
    }

    fn free_library(&self, _module: Address) -> MemoryResult<()> {
        let mut state = self.state.lock();
        state.calls.push("free_library");
        state.loaded_libraries = state.loaded_libraries.saturating_sub(1);
        Ok(())
    }

    fn export_address(&self, module: Address, name: &str) -> MemoryResult<Address> {
        let mut state = self.state.lock();
        state.calls.push("export_address");
        state
            .exports
            .get(&(module, name.to_string()))
            .copied()
            .ok_or_else(|| MemoryError::ExportNotFound {
                module: module.to_string(),
                export: name.to_string(),
            })
    }

    fn is_process_running(&self, process: OsHandle) -> MemoryResult<bool> {
        let mut state = self.state.lock();
        state.calls.push("is_process_running");
        let pid = *state
            .handles
            .get(&process.0)
            .ok_or_else(|| MemoryError::InvalidHandle(process.to_string()))?;
        Ok(!state.exited.contains(&pid))
    }

    fn create_process_suspended(
        &self,
        _path: &Path,
        _args: &[String],
    ) -> MemoryResult<SpawnedProcess> {
        let mut state = self.state.lock();
        state.calls.push("create_process_suspended");
        state.next_pid += 4;
        Ok(SpawnedProcess {
            pid: state.next_pid,
            main_thread_id: state.next_pid + 1,
        })
    }

    fn resume_thread(&self, thread_id: ThreadId) -> MemoryResult<()> {
        let mut state = self.state.lock();
        state.calls.push("resume_thread");
        state.resumed.push(thread_id);
        Ok(())
    }
}
