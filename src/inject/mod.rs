//! Module injection and remote export calls
//!
//! A module is injected by starting a thread in the foreign process at
//! `LoadLibraryW` with the module path as its argument. `kernel32.dll` is
//! mapped at the same base in every process of a boot session, so the
//! address resolved locally is valid in the foreign process too.
//!
//! Exports of an injected module are resolved without reading the foreign
//! export table: the same file is mapped locally without running its
//! initializer, and the export's offset from the local base is applied to
//! the foreign base. Both mappings must share one layout.

mod guards;
pub mod module;
pub mod rebase;

pub use module::InjectedModule;
pub use rebase::{ParameterBlock, Pointee, PointerField, RemoteStruct, StructSchema};

use crate::core::types::{Address, MemoryError, MemoryResult, StringEncoding};
use crate::memory::MemoryAccess;
use crate::process::{LoadMode, ProcessContext, WaitOutcome};
use guards::{LocalLibrary, RemoteAllocation, ThreadHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_MODULE: &str = "kernel32.dll";
const LOAD_LIBRARY: &str = "LoadLibraryW";
const FREE_LIBRARY: &str = "FreeLibrary";

/// Outcome of a function run on a foreign thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    /// The thread finished with this exit code
    Completed(u32),
    /// The wait ran out; the thread may still be running
    TimedOut,
}

impl RemoteCall {
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            RemoteCall::Completed(code) => Some(*code),
            RemoteCall::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, RemoteCall::TimedOut)
    }
}

impl ProcessContext {
    /// Address of a system loader function, valid in every process
    fn system_export(&self, name: &str) -> MemoryResult<Address> {
        let module = self.os().module_handle(SYSTEM_MODULE)?;
        self.os().export_address(module, name)
    }

    /// Runs `entry(argument)` on a new thread in this process
    fn run_remote(
        &self,
        entry: Address,
        argument: Address,
        timeout: Option<Duration>,
    ) -> MemoryResult<RemoteCall> {
        let process = self.handle()?;
        let raw = self
            .os()
            .create_remote_thread(process.raw(), entry, argument)?;
        let thread = ThreadHandle::new(self.os().clone(), raw);
        debug!(pid = self.pid(), %entry, %argument, "Started remote thread");

        match thread.wait(timeout)? {
            WaitOutcome::TimedOut => Ok(RemoteCall::TimedOut),
            WaitOutcome::Signaled => Ok(RemoteCall::Completed(thread.exit_code()?)),
        }
    }

    /// Loads the module at `path` into this process.
    ///
    /// `name` defaults to the file name and must be unique among this
    /// process's injected modules.
    pub fn inject_module(
        &self,
        path: impl AsRef<Path>,
        name: Option<&str>,
    ) -> MemoryResult<Arc<InjectedModule>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MemoryError::FileNotFound(path.to_path_buf()));
        }
        self.ensure_live()?;
        let path = std::path::absolute(path)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .ok_or_else(|| MemoryError::FileNotFound(path.clone()))?,
        };

        let mut modules = self.modules.lock();
        if modules.contains_key(&name) {
            return Err(MemoryError::DuplicateModule(name));
        }

        let load_library = self.system_export(LOAD_LIBRARY)?;
        let wide_path = StringEncoding::Utf16.encode(&path.to_string_lossy(), true)?;
        let buffer = RemoteAllocation::new(self, wide_path.len())?;
        self.memory()?.write_bytes(buffer.address(), &wide_path)?;

        let timeout = self.config().injection.inject_timeout();
        let base = match self.run_remote(load_library, buffer.address(), timeout)? {
            RemoteCall::Completed(0) => {
                return Err(MemoryError::InjectionFailed(format!(
                    "{} returned null for {}",
                    LOAD_LIBRARY,
                    path.display()
                )));
            }
            // The exit code is a DWORD, so only the low half of a 64-bit base survives
            RemoteCall::Completed(base) => Address::new(base as usize),
            RemoteCall::TimedOut => {
                buffer.leak();
                return Err(MemoryError::InjectionFailed(format!(
                    "{} did not finish loading {}",
                    LOAD_LIBRARY,
                    path.display()
                )));
            }
        };

        let module = Arc::new(InjectedModule::new(name.clone(), path, base));
        modules.insert(name, module.clone());
        info!(pid = self.pid(), module = %module, "Injected module");
        Ok(module)
    }

    /// Foreign address of `export` in the injected module `module`
    pub fn find_export(&self, module: &str, export: &str) -> MemoryResult<Address> {
        let module = self.require_module(module)?;
        self.resolve_export(&module, export)
    }

    fn resolve_export(&self, module: &InjectedModule, export: &str) -> MemoryResult<Address> {
        if let Some(address) = module.cached_export(export) {
            return Ok(address);
        }

        let local = LocalLibrary::load(
            self.os().clone(),
            module.path(),
            LoadMode::DontResolveReferences,
        )?;
        let local_export = local.export(export)?;
        let offset = local_export
            .as_usize()
            .checked_sub(local.base().as_usize())
            .ok_or_else(|| MemoryError::InvalidAddress(local_export.to_string()))?;

        let address = module.base().add(offset);
        module.cache_export(export, address);
        debug!(module = module.name(), export, %address, offset, "Resolved export");
        Ok(address)
    }

    fn require_module(&self, name: &str) -> MemoryResult<Arc<InjectedModule>> {
        self.injected_module(name).ok_or_else(|| {
            MemoryError::InconsistentState(format!(
                "module {} is not injected into process {}",
                name,
                self.pid()
            ))
        })
    }

    /// Runs an export of an injected module on a foreign thread.
    ///
    /// `parameter` is copied into the foreign process with its pointer fields
    /// rebased and passed as the thread argument; without one the argument
    /// is null. A `timeout` of `None` falls back to the configured call
    /// timeout. On timeout the parameter copy is left allocated because the
    /// thread may still read it.
    pub fn call_export(
        &self,
        module: &str,
        export: &str,
        parameter: Option<&ParameterBlock>,
        timeout: Option<Duration>,
    ) -> MemoryResult<RemoteCall> {
        let module = self.require_module(module)?;
        let entry = self.resolve_export(&module, export)?;

        let argument = match parameter {
            Some(block) => {
                let buffer = RemoteAllocation::new(self, block.len().max(1))?;
                let bytes = block.rebased(buffer.address());
                self.memory()?.write_bytes(buffer.address(), &bytes)?;
                Some(buffer)
            }
            None => None,
        };
        let argument_address = argument
            .as_ref()
            .map_or(Address::null(), RemoteAllocation::address);

        let timeout = timeout.or_else(|| self.config().injection.call_timeout());
        let outcome = self.run_remote(entry, argument_address, timeout)?;
        match outcome {
            RemoteCall::Completed(code) => {
                debug!(module = module.name(), export, code, "Remote call completed");
            }
            RemoteCall::TimedOut => {
                warn!(module = module.name(), export, "Remote call timed out");
                if let Some(buffer) = argument {
                    buffer.leak();
                }
            }
        }
        Ok(outcome)
    }

    /// Unloads an injected module from this process and forgets it
    pub fn eject(&self, module: &str) -> MemoryResult<()> {
        let mut modules = self.modules.lock();
        let record = modules.get(module).cloned().ok_or_else(|| {
            MemoryError::InconsistentState(format!(
                "module {} is not injected into process {}",
                module,
                self.pid()
            ))
        })?;

        let free_library = self.system_export(FREE_LIBRARY)?;
        let timeout = self.config().injection.inject_timeout();
        match self.run_remote(free_library, record.base(), timeout)? {
            RemoteCall::Completed(0) => Err(MemoryError::EjectFailed(module.to_string())),
            RemoteCall::Completed(_) => {
                modules.remove(module);
                info!(pid = self.pid(), module = %record, "Ejected module");
                Ok(())
            }
            RemoteCall::TimedOut => Err(MemoryError::EjectFailed(format!(
                "{} (timed out)",
                module
            ))),
        }
    }

    /// Injected modules, sorted by name
    pub fn injected_modules(&self) -> Vec<Arc<InjectedModule>> {
        let mut modules: Vec<_> = self.modules.lock().values().cloned().collect();
        modules.sort_by(|a, b| a.name().cmp(b.name()));
        modules
    }

    pub fn injected_module(&self, name: &str) -> Option<Arc<InjectedModule>> {
        self.modules.lock().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::process::fake::FakeOs;
    use crate::process::ProcessRegistry;
    use std::mem::size_of;
    use tempfile::NamedTempFile;

    const KERNEL32: Address = Address::new(0x7700_0000);
    const LOAD_LIBRARY_W: Address = Address::new(0x7701_0000);
    const FREE_LIBRARY_W: Address = Address::new(0x7702_0000);
    const REMOTE_BASE: u32 = 0x6000_0000;
    const LOCAL_BASE: Address = Address::new(0x1000_0000);

    struct Fixture {
        fake: Arc<FakeOs>,
        registry: ProcessRegistry,
        image: NamedTempFile,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(Config::default())
        }

        fn with_config(config: Config) -> Self {
            let fake = Arc::new(FakeOs::new());
            fake.add_module("KERNEL32.DLL", KERNEL32);
            fake.add_export(KERNEL32, "LoadLibraryW", LOAD_LIBRARY_W);
            fake.add_export(KERNEL32, "FreeLibrary", FREE_LIBRARY_W);
            fake.set_thread_exit_code(LOAD_LIBRARY_W, REMOTE_BASE);
            fake.set_thread_exit_code(FREE_LIBRARY_W, 1);

            let image = tempfile::Builder::new()
                .prefix("payload")
                .suffix(".dll")
                .tempfile()
                .unwrap();
            let registry = ProcessRegistry::new(fake.clone(), config);
            Fixture {
                fake,
                registry,
                image,
            }
        }

        fn image_name(&self) -> String {
            self.image
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        }

        fn image_path(&self) -> std::path::PathBuf {
            std::path::absolute(self.image.path()).unwrap()
        }

        /// Registers a local copy of the image exporting `Run` at +0x1234
        fn with_run_export(&self) -> Address {
            self.fake.add_library(&self.image_path(), LOCAL_BASE);
            self.fake
                .add_export(LOCAL_BASE, "Run", LOCAL_BASE.add(0x1234));
            Address::new(REMOTE_BASE as usize + 0x1234)
        }
    }

    #[test]
    fn test_inject_records_module() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);

        let module = context.inject_module(fixture.image.path(), None).unwrap();
        assert_eq!(module.name(), fixture.image_name());
        assert_eq!(module.base(), Address::new(REMOTE_BASE as usize));
        assert_eq!(module.path(), fixture.image_path());

        let threads = fixture.fake.remote_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].entry, LOAD_LIBRARY_W);
        let expected = StringEncoding::Utf16
            .encode(&fixture.image_path().to_string_lossy(), true)
            .unwrap();
        assert_eq!(threads[0].argument_bytes, expected);

        // Path buffer freed and thread handle closed; the process handle stays
        assert_eq!(fixture.fake.live_allocations(), 0);
        assert_eq!(fixture.fake.open_handles(), 1);
        assert_eq!(context.injected_modules().len(), 1);
    }

    #[test]
    fn test_inject_missing_file_makes_no_os_calls() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);

        let result = context.inject_module("no/such/payload.dll", None);
        assert!(matches!(result, Err(MemoryError::FileNotFound(_))));
        assert!(fixture.fake.calls().is_empty());
    }

    #[test]
    fn test_inject_duplicate_name() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);
        context
            .inject_module(fixture.image.path(), Some("payload"))
            .unwrap();

        match context.inject_module(fixture.image.path(), Some("payload")) {
            Err(MemoryError::DuplicateModule(name)) => assert_eq!(name, "payload"),
            other => panic!("Expected DuplicateModule, got {:?}", other),
        }
        assert_eq!(fixture.fake.remote_threads().len(), 1);
    }

    #[test]
    fn test_inject_null_base_fails() {
        let fixture = Fixture::new();
        fixture.fake.set_thread_exit_code(LOAD_LIBRARY_W, 0);
        let context = fixture.registry.for_process(100);

        assert!(matches!(
            context.inject_module(fixture.image.path(), None),
            Err(MemoryError::InjectionFailed(_))
        ));
        assert!(context.injected_modules().is_empty());
        assert_eq!(fixture.fake.live_allocations(), 0);
        assert_eq!(fixture.fake.open_handles(), 1);
    }

    #[test]
    fn test_inject_timeout_leaks_path_buffer() {
        let mut config = Config::default();
        config.injection.inject_timeout_ms = Some(50);
        let fixture = Fixture::with_config(config);
        fixture.fake.hang_threads_at(LOAD_LIBRARY_W);
        let context = fixture.registry.for_process(100);

        assert!(matches!(
            context.inject_module(fixture.image.path(), None),
            Err(MemoryError::InjectionFailed(_))
        ));
        assert_eq!(fixture.fake.live_allocations(), 1);
        assert!(context.injected_modules().is_empty());
    }

    #[test]
    fn test_find_export_applies_local_offset() {
        let fixture = Fixture::new();
        let expected = fixture.with_run_export();
        let context = fixture.registry.for_process(100);
        let module = context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        assert_eq!(context.find_export("payload", "Run").unwrap(), expected);
        assert_eq!(context.find_export("payload", "Run").unwrap(), expected);
        assert_eq!(module.cached_export("Run"), Some(expected));

        let loads = fixture.fake.library_loads();
        assert_eq!(
            loads,
            vec![(fixture.image_path(), LoadMode::DontResolveReferences)]
        );
        assert_eq!(fixture.fake.loaded_libraries(), 0);
    }

    #[test]
    fn test_find_missing_export() {
        let fixture = Fixture::new();
        fixture.with_run_export();
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        assert!(matches!(
            context.find_export("payload", "Missing"),
            Err(MemoryError::ExportNotFound { .. })
        ));
        assert_eq!(fixture.fake.loaded_libraries(), 0);
    }

    #[test]
    fn test_call_export_unknown_module() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);
        assert!(matches!(
            context.call_export("ghost.dll", "Run", None, None),
            Err(MemoryError::InconsistentState(_))
        ));
    }

    #[test]
    fn test_call_export_with_rebased_parameter() {
        let fixture = Fixture::new();
        let run = fixture.with_run_export();
        fixture.fake.set_thread_exit_code(run, 7);
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        let mut block = ParameterBlock::new(vec![0u8; size_of::<usize>()]);
        block.attach(0, b"config\0").unwrap();

        let outcome = context
            .call_export("payload", "Run", Some(&block), None)
            .unwrap();
        assert_eq!(outcome, RemoteCall::Completed(7));
        assert_eq!(outcome.exit_code(), Some(7));

        let thread = fixture.fake.remote_threads().pop().unwrap();
        assert_eq!(thread.entry, run);
        assert_eq!(thread.argument_bytes, block.rebased(thread.argument));
        assert_eq!(fixture.fake.live_allocations(), 0);
    }

    #[test]
    fn test_call_export_without_parameter() {
        let fixture = Fixture::new();
        fixture.with_run_export();
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        context.call_export("payload", "Run", None, None).unwrap();
        let thread = fixture.fake.remote_threads().pop().unwrap();
        assert!(thread.argument.is_null());
    }

    #[test]
    fn test_call_export_timeout_leaks_parameter() {
        let fixture = Fixture::new();
        let run = fixture.with_run_export();
        fixture.fake.hang_threads_at(run);
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        let block = ParameterBlock::new(vec![1, 2, 3, 4]);
        let outcome = context
            .call_export("payload", "Run", Some(&block), Some(Duration::from_millis(10)))
            .unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(fixture.fake.live_allocations(), 1);
    }

    #[test]
    fn test_eject_removes_record() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        context.eject("payload").unwrap();
        assert!(context.injected_module("payload").is_none());

        let thread = fixture.fake.remote_threads().pop().unwrap();
        assert_eq!(thread.entry, FREE_LIBRARY_W);
        assert_eq!(thread.argument, Address::new(REMOTE_BASE as usize));

        assert!(matches!(
            context.eject("payload"),
            Err(MemoryError::InconsistentState(_))
        ));
    }

    #[test]
    fn test_eject_failure_keeps_record() {
        let fixture = Fixture::new();
        fixture.fake.set_thread_exit_code(FREE_LIBRARY_W, 0);
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("payload")).unwrap();

        match context.eject("payload") {
            Err(MemoryError::EjectFailed(name)) => assert_eq!(name, "payload"),
            other => panic!("Expected EjectFailed, got {:?}", other),
        }
        assert!(context.injected_module("payload").is_some());
    }

    #[test]
    fn test_injected_modules_sorted() {
        let fixture = Fixture::new();
        let context = fixture.registry.for_process(100);
        context.inject_module(fixture.image.path(), Some("zeta")).unwrap();
        context.inject_module(fixture.image.path(), Some("alpha")).unwrap();

        let names: Vec<_> = context
            .injected_modules()
            .iter()
            .map(|module| module.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
