//! Per-process table of active memory edits

use super::edit::MemoryEdit;
use crate::core::types::Address;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Shared handle to a registered edit
pub type SharedEdit = Arc<dyn MemoryEdit>;

/// Active edits keyed by the address they overwrite.
///
/// At most one edit is tracked per address. Registering a second edit at an
/// occupied address disposes the first.
#[derive(Default)]
pub struct EditRegistry {
    edits: BTreeMap<Address, SharedEdit>,
}

impl EditRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `edit`, disposing whatever was registered at its address
    pub fn insert(&mut self, edit: SharedEdit) {
        let address = edit.address();
        if let Some(previous) = self.edits.insert(address, edit) {
            debug!(%address, "Replacing registered edit");
            previous.dispose();
        }
    }

    /// Stops tracking the edit at `address` without reverting it
    pub fn take(&mut self, address: Address) -> Option<SharedEdit> {
        self.edits.remove(&address)
    }

    /// Reverts and forgets the edit at `address`
    pub fn remove(&mut self, address: Address) -> bool {
        match self.edits.remove(&address) {
            Some(edit) => {
                edit.dispose();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, address: Address) -> Option<&SharedEdit> {
        self.edits.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.edits.contains_key(&address)
    }

    /// Addresses with a registered edit, ascending
    pub fn addresses(&self) -> Vec<Address> {
        self.edits.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Reverts every edit, then clears the table
    pub fn dispose(&mut self) {
        for edit in self.edits.values() {
            edit.dispose();
        }
        self.edits.clear();
    }
}

impl Drop for EditRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}
