//! Per-process state and the registry that owns it
//!
//! A [`ProcessContext`] bundles everything tracked for one process: the
//! lazily opened handle, the active memory edits and the injected modules.
//! Contexts are handed out by a [`ProcessRegistry`], one per process id.

use super::handle::ProcessHandle;
use super::os::{OsBackend, Space};
use crate::config::Config;
use crate::core::types::{Address, MemoryError, MemoryResult, ProcessId, ThreadId};
use crate::detour::{EditRegistry, MemoryEdit};
use crate::inject::InjectedModule;
use crate::memory::{LocalMemory, Protection, RemoteMemory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything tracked for one process
pub struct ProcessContext {
    pid: ProcessId,
    os: Arc<dyn OsBackend>,
    config: Arc<Config>,
    handle: Mutex<Option<Arc<ProcessHandle>>>,
    edits: Mutex<EditRegistry>,
    pub(crate) modules: Mutex<HashMap<String, Arc<InjectedModule>>>,
    main_thread_id: Mutex<Option<ThreadId>>,
    disposed: AtomicBool,
}

impl ProcessContext {
    fn new(pid: ProcessId, os: Arc<dyn OsBackend>, config: Arc<Config>) -> Self {
        ProcessContext {
            pid,
            os,
            config,
            handle: Mutex::new(None),
            edits: Mutex::new(EditRegistry::new()),
            modules: Mutex::new(HashMap::new()),
            main_thread_id: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Whether this context describes the calling process
    pub fn is_current(&self) -> bool {
        self.pid == self.os.current_process_id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn os(&self) -> &Arc<dyn OsBackend> {
        &self.os
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> MemoryResult<()> {
        if self.is_disposed() {
            return Err(MemoryError::InconsistentState(format!(
                "process {} is no longer tracked",
                self.pid
            )));
        }
        Ok(())
    }

    /// The process handle, opened on first use
    pub fn handle(&self) -> MemoryResult<Arc<ProcessHandle>> {
        self.ensure_live()?;
        let mut slot = self.handle.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = Arc::new(ProcessHandle::open_standard(self.os.clone(), self.pid)?);
        debug!(pid = self.pid, handle = %handle.raw(), "Opened process handle");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Cross-process accessor; also valid for the calling process
    pub fn memory(&self) -> MemoryResult<RemoteMemory> {
        Ok(RemoteMemory::new(self.handle()?).with_max_string_bytes(self.config.memory.max_string_bytes))
    }

    /// Direct accessor for the calling process.
    ///
    /// # Safety
    /// Same contract as [`LocalMemory::new`].
    pub unsafe fn local_memory(&self) -> MemoryResult<LocalMemory> {
        self.ensure_live()?;
        if !self.is_current() {
            return Err(MemoryError::UnsupportedOperation(format!(
                "process {} is not the calling process",
                self.pid
            )));
        }
        Ok(LocalMemory::new(self.os.clone()).with_max_string_bytes(self.config.memory.max_string_bytes))
    }

    fn space(&self) -> MemoryResult<(Space, Option<Arc<ProcessHandle>>)> {
        self.ensure_live()?;
        if self.is_current() {
            Ok((Space::Local, None))
        } else {
            let handle = self.handle()?;
            Ok((handle.space(), Some(handle)))
        }
    }

    /// Allocates in this process, locally when it is the caller's own
    pub fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address> {
        let (space, _handle) = self.space()?;
        self.os.allocate(space, hint, size, protection)
    }

    /// Allocates with the configured default protection
    pub fn allocate_buffer(&self, size: usize) -> MemoryResult<Address> {
        self.allocate(None, size, self.config.memory.allocation_protection)
    }

    pub fn free(&self, address: Address) -> MemoryResult<()> {
        let (space, _handle) = self.space()?;
        self.os.free(space, address)
    }

    pub fn is_running(&self) -> MemoryResult<bool> {
        if self.is_current() {
            return Ok(true);
        }
        self.handle()?.is_running()
    }

    /// Main thread id of a process started through
    /// [`ProcessRegistry::spawn_suspended`]
    pub fn main_thread_id(&self) -> Option<ThreadId> {
        *self.main_thread_id.lock()
    }

    /// Resumes the suspended main thread
    pub fn resume(&self) -> MemoryResult<()> {
        self.ensure_live()?;
        let thread_id = self.main_thread_id().ok_or_else(|| {
            MemoryError::InconsistentState(format!(
                "process {} was not started suspended",
                self.pid
            ))
        })?;
        self.os.resume_thread(thread_id)?;
        info!(pid = self.pid, thread_id, "Resumed main thread");
        Ok(())
    }

    /// Builds an edit at `address`, registers it and applies it.
    ///
    /// Any edit already registered at `address` is reverted before `build`
    /// runs, so the new edit captures the unmodified bytes. If that revert
    /// fails the previous edit stays registered and nothing is built. On
    /// failure the new edit is not left registered.
    pub fn install_edit<E, B>(&self, address: Address, build: B) -> MemoryResult<Arc<E>>
    where
        E: MemoryEdit + 'static,
        B: FnOnce() -> MemoryResult<E>,
    {
        self.ensure_live()?;
        let mut edits = self.edits.lock();
        if let Some(previous) = edits.take(address) {
            if let Err(e) = previous.remove() {
                edits.insert(previous);
                return Err(e);
            }
        }

        let edit = Arc::new(build()?);
        edits.insert(edit.clone());
        if let Err(e) = edit.apply() {
            edits.take(edit.address());
            return Err(e);
        }
        Ok(edit)
    }

    /// Reverts and forgets the edit at `address`
    pub fn remove_edit(&self, address: Address) -> bool {
        self.edits.lock().remove(address)
    }

    /// Addresses with an active edit
    pub fn edit_addresses(&self) -> Vec<Address> {
        self.edits.lock().addresses()
    }

    /// Reverts every edit, forgets injected modules and closes the handle
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.edits.lock().dispose();
        self.modules.lock().clear();
        self.handle.lock().take();
        debug!(pid = self.pid, "Process context disposed");
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("pid", &self.pid)
            .field("edits", &self.edits.lock().len())
            .field("modules", &self.modules.lock().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Hands out one [`ProcessContext`] per process id
pub struct ProcessRegistry {
    os: Arc<dyn OsBackend>,
    config: Arc<Config>,
    contexts: Mutex<HashMap<ProcessId, Arc<ProcessContext>>>,
}

impl ProcessRegistry {
    pub fn new(os: Arc<dyn OsBackend>, config: Config) -> Self {
        ProcessRegistry {
            os,
            config: Arc::new(config),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by the Windows API
    #[cfg(windows)]
    pub fn windows(config: Config) -> Self {
        Self::new(Arc::new(crate::windows::WindowsOs::new()), config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn os(&self) -> &Arc<dyn OsBackend> {
        &self.os
    }

    /// The context for `pid`, created on first request
    pub fn for_process(&self, pid: ProcessId) -> Arc<ProcessContext> {
        self.contexts
            .lock()
            .entry(pid)
            .or_insert_with(|| Arc::new(ProcessContext::new(pid, self.os.clone(), self.config.clone())))
            .clone()
    }

    /// The context for the calling process
    pub fn current(&self) -> Arc<ProcessContext> {
        self.for_process(self.os.current_process_id())
    }

    pub fn get(&self, pid: ProcessId) -> Option<Arc<ProcessContext>> {
        self.contexts.lock().get(&pid).cloned()
    }

    /// Tracked process ids, ascending
    pub fn tracked(&self) -> Vec<ProcessId> {
        let mut pids: Vec<_> = self.contexts.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Tears down the context of a process that has exited
    pub fn process_exited(&self, pid: ProcessId) -> bool {
        let removed = self.contexts.lock().remove(&pid);
        match removed {
            Some(context) => {
                context.dispose();
                info!(pid, "Process context torn down");
                true
            }
            None => false,
        }
    }

    /// Tears down every tracked process that is no longer running
    pub fn reap_exited(&self) -> Vec<ProcessId> {
        let contexts: Vec<_> = self.contexts.lock().values().cloned().collect();
        let mut exited = Vec::new();
        for context in contexts {
            let running = match context.is_running() {
                Ok(running) => running,
                Err(e) => {
                    debug!(pid = context.pid(), error = %e, "Treating unreachable process as exited");
                    false
                }
            };
            if !running && self.process_exited(context.pid()) {
                exited.push(context.pid());
            }
        }
        exited.sort_unstable();
        exited
    }

    /// Starts `path` with its main thread suspended
    pub fn spawn_suspended(
        &self,
        path: impl AsRef<Path>,
        args: &[String],
    ) -> MemoryResult<Arc<ProcessContext>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MemoryError::FileNotFound(path.to_path_buf()));
        }
        let path = std::path::absolute(path)?;
        let spawned = self.os.create_process_suspended(&path, args)?;
        info!(pid = spawned.pid, image = %path.display(), "Spawned suspended process");

        let context = self.for_process(spawned.pid);
        *context.main_thread_id.lock() = Some(spawned.main_thread_id);
        Ok(context)
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        let contexts: Vec<_> = self.contexts.lock().drain().map(|(_, c)| c).collect();
        for context in contexts {
            context.dispose();
        }
    }
}
