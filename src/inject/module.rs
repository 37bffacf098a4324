//! Record of a module loaded into a foreign process

use crate::core::types::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A module injected into a foreign process
pub struct InjectedModule {
    name: String,
    path: PathBuf,
    base: Address,
    exports: Mutex<HashMap<String, Address>>,
}

impl InjectedModule {
    pub(crate) fn new(name: String, path: PathBuf, base: Address) -> Self {
        InjectedModule {
            name,
            path,
            base,
            exports: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load address in the foreign process
    pub fn base(&self) -> Address {
        self.base
    }

    /// Previously resolved foreign address of `export`
    pub fn cached_export(&self, export: &str) -> Option<Address> {
        self.exports.lock().get(export).copied()
    }

    pub(crate) fn cache_export(&self, export: &str, address: Address) {
        self.exports.lock().insert(export.to_string(), address);
    }

    /// Resolved exports, sorted by name
    pub fn resolved_exports(&self) -> Vec<(String, Address)> {
        let mut exports: Vec<_> = self
            .exports
            .lock()
            .iter()
            .map(|(name, address)| (name.clone(), *address))
            .collect();
        exports.sort();
        exports
    }
}

impl fmt::Debug for InjectedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("base", &self.base)
            .field("exports", &self.exports.lock().len())
            .finish()
    }
}

impl fmt::Display for InjectedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.base)
    }
}
