//! The operating system collaborator
//!
//! Every OS primitive the crate needs goes through [`OsBackend`]. The Windows
//! implementation lives in [`crate::windows::WindowsOs`].

use crate::core::types::{Address, MemoryResult, ProcessId, ThreadId};
use crate::memory::Protection;
use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::time::Duration;

/// An opaque OS handle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsHandle(pub usize);

impl OsHandle {
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for OsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:0x{:X}", self.0)
    }
}

/// Address space an allocation or protection change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// The calling process
    Local,
    /// A foreign process, through an open handle
    Remote(OsHandle),
}

/// Access rights for process handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAccess {
    value: u32,
}

impl ProcessAccess {
    /// All possible access rights
    pub const ALL_ACCESS: Self = Self { value: 0x1FFFFF };
    /// Query information access
    pub const QUERY_INFORMATION: Self = Self { value: 0x0400 };
    /// Create threads in the process
    pub const CREATE_THREAD: Self = Self { value: 0x0002 };
    /// Allocate, free and protect memory
    pub const VM_OPERATION: Self = Self { value: 0x0008 };
    /// Read memory access
    pub const VM_READ: Self = Self { value: 0x0010 };
    /// Write memory access
    pub const VM_WRITE: Self = Self { value: 0x0020 };

    /// Rights needed for memory access, detouring and injection
    pub const fn standard() -> Self {
        Self {
            value: Self::QUERY_INFORMATION.value
                | Self::CREATE_THREAD.value
                | Self::VM_OPERATION.value
                | Self::VM_READ.value
                | Self::VM_WRITE.value,
        }
    }

    /// Combine access rights
    pub fn combine(rights: &[Self]) -> Self {
        rights.iter().fold(Self { value: 0 }, |acc, right| acc | *right)
    }

    /// Get raw value
    pub const fn value(&self) -> u32 {
        self.value
    }
}

impl BitOr for ProcessAccess {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            value: self.value | rhs.value,
        }
    }
}

impl Default for ProcessAccess {
    fn default() -> Self {
        Self::standard()
    }
}

/// How a module is mapped into the calling process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Normal load, running the module initializer
    Normal,
    /// Map only, without resolving imports or running the initializer
    DontResolveReferences,
}

/// Result of waiting on a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Identity of a process created with its main thread suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: ProcessId,
    pub main_thread_id: ThreadId,
}

/// Operating system primitives used by the accessors, detours and injection
pub trait OsBackend: Send + Sync {
    /// Id of the calling process
    fn current_process_id(&self) -> ProcessId;

    fn open_process(&self, pid: ProcessId, access: ProcessAccess) -> MemoryResult<OsHandle>;

    fn close_handle(&self, handle: OsHandle) -> MemoryResult<()>;

    /// Reserves and commits `size` bytes, optionally near `hint`
    fn allocate(
        &self,
        space: Space,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address>;

    /// Releases an allocation made by [`OsBackend::allocate`]
    fn free(&self, space: Space, address: Address) -> MemoryResult<()>;

    /// Changes page protection and returns the previous protection
    fn protect(
        &self,
        space: Space,
        address: Address,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Protection>;

    /// Returns the number of bytes actually read
    fn read_process_memory(
        &self,
        process: OsHandle,
        address: Address,
        buffer: &mut [u8],
    ) -> MemoryResult<usize>;

    /// Returns the number of bytes actually written
    fn write_process_memory(
        &self,
        process: OsHandle,
        address: Address,
        data: &[u8],
    ) -> MemoryResult<usize>;

    fn flush_instruction_cache(&self, space: Space, address: Address, size: usize)
        -> MemoryResult<()>;

    /// Starts a thread in `process` at `entry` with one pointer-sized argument
    fn create_remote_thread(
        &self,
        process: OsHandle,
        entry: Address,
        argument: Address,
    ) -> MemoryResult<OsHandle>;

    /// Waits for a thread to finish; `None` waits forever
    fn wait_for_thread(
        &self,
        thread: OsHandle,
        timeout: Option<Duration>,
    ) -> MemoryResult<WaitOutcome>;

    fn thread_exit_code(&self, thread: OsHandle) -> MemoryResult<u32>;

    /// Base of a module already loaded in the calling process
    fn module_handle(&self, name: &str) -> MemoryResult<Address>;

    /// Loads a module into the calling process and returns its base
    fn load_library(&self, path: &Path, mode: LoadMode) -> MemoryResult<Address>;

    fn free_library(&self, module: Address) -> MemoryResult<()>;

    /// Address of a named export of a module loaded in the calling process
    fn export_address(&self, module: Address, name: &str) -> MemoryResult<Address>;

    fn is_process_running(&self, process: OsHandle) -> MemoryResult<bool>;

    fn create_process_suspended(&self, path: &Path, args: &[String])
        -> MemoryResult<SpawnedProcess>;

    fn resume_thread(&self, thread_id: ThreadId) -> MemoryResult<()>;
}
