//! Kernel32.dll bindings for process, memory, thread and loader operations
//!
//! A `process` of `None` targets the calling process.

use crate::core::types::{MemoryError, MemoryResult};
use crate::windows::utils::{last_error_as_memory_error, ErrorCode};
use std::ffi::CString;
use std::ptr;
use winapi::shared::minwindef::{DWORD, FALSE, HMODULE, LPVOID};
use winapi::shared::winerror::WAIT_TIMEOUT;
use winapi::um::handleapi::CloseHandle;
use winapi::um::libloaderapi::{
    FreeLibrary, GetModuleHandleW, GetProcAddress, LoadLibraryExW, DONT_RESOLVE_DLL_REFERENCES,
};
use winapi::um::memoryapi::{
    ReadProcessMemory, VirtualAlloc, VirtualAllocEx, VirtualFree, VirtualFreeEx, VirtualProtect,
    VirtualProtectEx, WriteProcessMemory,
};
use winapi::um::minwinbase::STILL_ACTIVE;
use winapi::um::processthreadsapi::{
    CreateProcessW, CreateRemoteThread, FlushInstructionCache, GetCurrentProcess,
    GetExitCodeProcess, GetExitCodeThread, OpenProcess, OpenThread, ResumeThread,
    PROCESS_INFORMATION, STARTUPINFOW,
};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{CREATE_SUSPENDED, INFINITE, WAIT_OBJECT_0};
use winapi::um::winnt::{HANDLE, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, THREAD_SUSPEND_RESUME};

type ThreadStart = unsafe extern "system" fn(LPVOID) -> DWORD;

/// Safe wrapper for OpenProcess
pub fn open_process(pid: u32, desired_access: u32) -> MemoryResult<HANDLE> {
    let handle = unsafe { OpenProcess(desired_access, FALSE, pid) };
    if handle.is_null() {
        Err(last_error_as_memory_error("OpenProcess"))
    } else {
        Ok(handle)
    }
}

/// Safe wrapper for CloseHandle
///
/// # Safety
/// The handle must be a valid Windows handle
pub unsafe fn close_handle(handle: HANDLE) -> MemoryResult<()> {
    if handle.is_null() {
        return Ok(());
    }
    if CloseHandle(handle) == FALSE {
        Err(last_error_as_memory_error("CloseHandle"))
    } else {
        Ok(())
    }
}

/// VirtualAlloc / VirtualAllocEx with MEM_COMMIT | MEM_RESERVE
///
/// # Safety
/// `process` must be a valid handle with VM_OPERATION access
pub unsafe fn virtual_alloc(
    process: Option<HANDLE>,
    hint: usize,
    size: usize,
    protection: u32,
) -> MemoryResult<usize> {
    let allocation_type = MEM_COMMIT | MEM_RESERVE;
    let address = match process {
        None => VirtualAlloc(hint as LPVOID, size, allocation_type, protection),
        Some(handle) => VirtualAllocEx(handle, hint as LPVOID, size, allocation_type, protection),
    };
    if address.is_null() {
        let code = ErrorCode::last_error();
        Err(MemoryError::allocation_failed(size, code.to_string()))
    } else {
        Ok(address as usize)
    }
}

/// VirtualFree / VirtualFreeEx releasing a whole allocation
///
/// # Safety
/// `address` must be the base of an allocation made by [`virtual_alloc`]
pub unsafe fn virtual_free(process: Option<HANDLE>, address: usize) -> MemoryResult<()> {
    let result = match process {
        None => VirtualFree(address as LPVOID, 0, MEM_RELEASE),
        Some(handle) => VirtualFreeEx(handle, address as LPVOID, 0, MEM_RELEASE),
    };
    if result == FALSE {
        Err(last_error_as_memory_error("VirtualFreeEx"))
    } else {
        Ok(())
    }
}

/// VirtualProtect / VirtualProtectEx; returns the previous protection
///
/// # Safety
/// `process` must be a valid handle with VM_OPERATION access
pub unsafe fn virtual_protect(
    process: Option<HANDLE>,
    address: usize,
    size: usize,
    protection: u32,
) -> MemoryResult<u32> {
    let mut previous: DWORD = 0;
    let result = match process {
        None => VirtualProtect(address as LPVOID, size, protection, &mut previous),
        Some(handle) => {
            VirtualProtectEx(handle, address as LPVOID, size, protection, &mut previous)
        }
    };
    if result == FALSE {
        Err(last_error_as_memory_error("VirtualProtectEx"))
    } else {
        Ok(previous)
    }
}

/// Safe wrapper for ReadProcessMemory.
///
/// A partial copy is reported through the returned count.
///
/// # Safety
/// The handle must be a valid process handle with VM_READ access
pub unsafe fn read_process_memory(
    handle: HANDLE,
    address: usize,
    buffer: &mut [u8],
) -> MemoryResult<usize> {
    let mut bytes_read = 0;
    let result = ReadProcessMemory(
        handle,
        address as LPVOID,
        buffer.as_mut_ptr() as LPVOID,
        buffer.len(),
        &mut bytes_read,
    );
    if result == FALSE && ErrorCode::last_error() != ErrorCode::PartialCopy {
        Err(last_error_as_memory_error("ReadProcessMemory"))
    } else {
        Ok(bytes_read)
    }
}

/// Safe wrapper for WriteProcessMemory.
///
/// A partial copy is reported through the returned count.
///
/// # Safety
/// The handle must be a valid process handle with VM_WRITE access
pub unsafe fn write_process_memory(
    handle: HANDLE,
    address: usize,
    data: &[u8],
) -> MemoryResult<usize> {
    let mut bytes_written = 0;
    let result = WriteProcessMemory(
        handle,
        address as LPVOID,
        data.as_ptr() as LPVOID,
        data.len(),
        &mut bytes_written,
    );
    if result == FALSE && ErrorCode::last_error() != ErrorCode::PartialCopy {
        Err(last_error_as_memory_error("WriteProcessMemory"))
    } else {
        Ok(bytes_written)
    }
}

/// # Safety
/// `process` must be a valid process handle
pub unsafe fn flush_instruction_cache(
    process: Option<HANDLE>,
    address: usize,
    size: usize,
) -> MemoryResult<()> {
    let handle = match process {
        Some(handle) => handle,
        None => GetCurrentProcess(),
    };
    if FlushInstructionCache(handle, address as LPVOID, size) == FALSE {
        Err(last_error_as_memory_error("FlushInstructionCache"))
    } else {
        Ok(())
    }
}

/// Starts a thread in `process` at `entry`.
///
/// # Safety
/// `entry` must be the address of a function in `process` taking one
/// pointer-sized argument with the system calling convention.
pub unsafe fn create_remote_thread(
    process: HANDLE,
    entry: usize,
    argument: usize,
) -> MemoryResult<HANDLE> {
    if entry == 0 {
        return Err(MemoryError::InvalidAddress("null thread entry".to_string()));
    }
    let start = std::mem::transmute::<usize, ThreadStart>(entry);
    let thread = CreateRemoteThread(
        process,
        ptr::null_mut(),
        0,
        Some(start),
        argument as LPVOID,
        0,
        ptr::null_mut(),
    );
    if thread.is_null() {
        Err(last_error_as_memory_error("CreateRemoteThread"))
    } else {
        Ok(thread)
    }
}

/// Waits on `thread`; returns false on timeout
///
/// # Safety
/// The handle must be a valid thread handle with SYNCHRONIZE access
pub unsafe fn wait_for_thread(thread: HANDLE, timeout_ms: Option<u32>) -> MemoryResult<bool> {
    match WaitForSingleObject(thread, timeout_ms.unwrap_or(INFINITE)) {
        WAIT_OBJECT_0 => Ok(true),
        WAIT_TIMEOUT => Ok(false),
        _ => Err(last_error_as_memory_error("WaitForSingleObject")),
    }
}

/// # Safety
/// The handle must be a valid thread handle
pub unsafe fn thread_exit_code(thread: HANDLE) -> MemoryResult<u32> {
    let mut code: DWORD = 0;
    if GetExitCodeThread(thread, &mut code) == FALSE {
        Err(last_error_as_memory_error("GetExitCodeThread"))
    } else {
        Ok(code)
    }
}

/// # Safety
/// The handle must be a valid process handle with query access
pub unsafe fn is_process_running(process: HANDLE) -> MemoryResult<bool> {
    let mut code: DWORD = 0;
    if GetExitCodeProcess(process, &mut code) == FALSE {
        Err(last_error_as_memory_error("GetExitCodeProcess"))
    } else {
        Ok(code == STILL_ACTIVE)
    }
}

/// Base of a module already loaded in the calling process
pub fn module_handle(wide_name: &[u16]) -> MemoryResult<usize> {
    let module = unsafe { GetModuleHandleW(wide_name.as_ptr()) };
    if module.is_null() {
        Err(last_error_as_memory_error("GetModuleHandleW"))
    } else {
        Ok(module as usize)
    }
}

/// Maps a module into the calling process.
///
/// # Safety
/// Unless `map_only` is set the module initializer runs in this process.
pub unsafe fn load_library(wide_path: &[u16], map_only: bool) -> MemoryResult<usize> {
    let flags = if map_only { DONT_RESOLVE_DLL_REFERENCES } else { 0 };
    let module = LoadLibraryExW(wide_path.as_ptr(), ptr::null_mut(), flags);
    if module.is_null() {
        Err(last_error_as_memory_error("LoadLibraryExW"))
    } else {
        Ok(module as usize)
    }
}

/// # Safety
/// `module` must come from [`load_library`] and no code of it may still run
pub unsafe fn free_library(module: usize) -> MemoryResult<()> {
    if FreeLibrary(module as HMODULE) == FALSE {
        Err(last_error_as_memory_error("FreeLibrary"))
    } else {
        Ok(())
    }
}

/// # Safety
/// `module` must be the base of a module loaded in the calling process
pub unsafe fn proc_address(module: usize, name: &str) -> MemoryResult<usize> {
    let not_found = || MemoryError::ExportNotFound {
        module: format!("0x{:X}", module),
        export: name.to_string(),
    };
    let c_name = CString::new(name).map_err(|_| not_found())?;
    let address = GetProcAddress(module as HMODULE, c_name.as_ptr());
    if address.is_null() {
        Err(not_found())
    } else {
        Ok(address as usize)
    }
}

/// Starts `command_line` with its main thread suspended; returns the
/// process and thread ids
pub fn create_process_suspended(
    wide_image: &[u16],
    command_line: &mut [u16],
) -> MemoryResult<(u32, u32)> {
    unsafe {
        let mut startup: STARTUPINFOW = std::mem::zeroed();
        startup.cb = std::mem::size_of::<STARTUPINFOW>() as DWORD;
        let mut info: PROCESS_INFORMATION = std::mem::zeroed();

        let created = CreateProcessW(
            wide_image.as_ptr(),
            command_line.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            FALSE,
            CREATE_SUSPENDED,
            ptr::null_mut(),
            ptr::null(),
            &mut startup,
            &mut info,
        );
        if created == FALSE {
            return Err(last_error_as_memory_error("CreateProcessW"));
        }
        let _ = close_handle(info.hThread);
        let _ = close_handle(info.hProcess);
        Ok((info.dwProcessId, info.dwThreadId))
    }
}

/// Opens a thread for suspend and resume
pub fn open_thread_for_resume(thread_id: u32) -> MemoryResult<HANDLE> {
    let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, FALSE, thread_id) };
    if thread.is_null() {
        Err(last_error_as_memory_error("OpenThread"))
    } else {
        Ok(thread)
    }
}

/// # Safety
/// The handle must be a valid thread handle with suspend/resume access
pub unsafe fn resume_thread(thread: HANDLE) -> MemoryResult<()> {
    if ResumeThread(thread) == DWORD::MAX {
        Err(last_error_as_memory_error("ResumeThread"))
    } else {
        Ok(())
    }
}
