//! Safe HANDLE wrapper with automatic cleanup

use crate::process::OsHandle;
use crate::windows::bindings::kernel32;
use std::ptr;
use tracing::warn;
use winapi::um::winnt::HANDLE;

/// Owned Windows HANDLE, closed on drop
pub struct Handle {
    handle: HANDLE,
}

impl Handle {
    pub fn new(handle: HANDLE) -> Self {
        Handle { handle }
    }

    pub fn null() -> Self {
        Handle {
            handle: ptr::null_mut(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }

    /// Hands the handle to the caller as an [`OsHandle`] without closing it
    pub fn into_os_handle(mut self) -> OsHandle {
        let handle = std::mem::replace(&mut self.handle, ptr::null_mut());
        OsHandle(handle as usize)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        if let Err(e) = unsafe { kernel32::close_handle(self.handle) } {
            warn!(error = %e, "Failed to close handle");
        }
    }
}

// HANDLE values are process-wide and usable from any thread
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}
