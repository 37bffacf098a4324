//! Safe process handle wrapper with RAII semantics

use super::os::{OsBackend, OsHandle, ProcessAccess, Space};
use crate::core::types::{MemoryError, MemoryResult, ProcessId};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// An open process handle, closed on drop
pub struct ProcessHandle {
    os: Arc<dyn OsBackend>,
    handle: OsHandle,
    pid: ProcessId,
    access: ProcessAccess,
}

impl ProcessHandle {
    /// Open a process with specified access rights
    pub fn open(os: Arc<dyn OsBackend>, pid: ProcessId, access: ProcessAccess) -> MemoryResult<Self> {
        let handle = os.open_process(pid, access)?;
        if handle.is_null() {
            return Err(MemoryError::InvalidHandle(format!(
                "null handle for process {}",
                pid
            )));
        }
        Ok(ProcessHandle {
            os,
            handle,
            pid,
            access,
        })
    }

    /// Open a process with the rights every subsystem needs
    pub fn open_standard(os: Arc<dyn OsBackend>, pid: ProcessId) -> MemoryResult<Self> {
        Self::open(os, pid, ProcessAccess::standard())
    }

    /// Get the process ID
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Get the raw handle.
    ///
    /// The value is only valid as long as this ProcessHandle exists.
    pub fn raw(&self) -> OsHandle {
        self.handle
    }

    /// The cross-process address space this handle refers to
    pub fn space(&self) -> Space {
        Space::Remote(self.handle)
    }

    /// Get the access rights
    pub fn access(&self) -> ProcessAccess {
        self.access
    }

    pub fn os(&self) -> &Arc<dyn OsBackend> {
        &self.os
    }

    /// Whether the process has not exited yet
    pub fn is_running(&self) -> MemoryResult<bool> {
        self.os.is_process_running(self.handle)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(e) = self.os.close_handle(self.handle) {
            warn!(pid = self.pid, error = %e, "Failed to close process handle");
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("handle", &self.handle)
            .field("access", &format!("0x{:X}", self.access.value()))
            .finish()
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessHandle(pid={}, {})", self.pid, self.handle)
    }
}
