//! Function detours with trampolines
//!
//! Applying a detour overwrites the first [`JUMP_SIZE`] bytes of the target
//! with a jump to the replacement. The whole instructions covering those
//! bytes are first copied into an executable trampoline followed by a jump
//! back into the target, so the original behavior stays callable.

use super::edit::{write_code, MemoryEdit};
use super::function::Function;
use super::jump::{encode_jump, JUMP_SIZE};
use crate::config::DetourConfig;
use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::disasm::decode_prefix;
use crate::memory::{LocalMemory, MemoryAccess, Protection};
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info, warn};

/// Smallest trampoline ever allocated
const MIN_TRAMPOLINE_SIZE: usize = 3 * JUMP_SIZE;

#[derive(Debug, Clone, Copy)]
struct Trampoline {
    address: Address,
    size: usize,
}

#[derive(Debug, Default)]
struct DetourState {
    applied: bool,
    /// Target bytes the jump overwrites, as of the last apply
    original: [u8; JUMP_SIZE],
    /// Stays recorded when a free fails, which blocks the next apply
    trampoline: Option<Trampoline>,
}

/// A detour of one function in the calling process
pub struct Detour<F: Function> {
    memory: LocalMemory,
    target: F,
    replacement: F,
    config: DetourConfig,
    state: Mutex<DetourState>,
}

impl<F: Function> Detour<F> {
    /// Creates an unapplied detour with the default configuration
    pub fn new(memory: LocalMemory, target: F, replacement: F) -> MemoryResult<Self> {
        Self::with_config(memory, target, replacement, DetourConfig::default())
    }

    /// Creates an unapplied detour, capturing the target's first bytes.
    /// They are captured again on every apply.
    pub fn with_config(
        memory: LocalMemory,
        target: F,
        replacement: F,
        config: DetourConfig,
    ) -> MemoryResult<Self> {
        let mut original = [0u8; JUMP_SIZE];
        memory.read_bytes(target.to_address(), &mut original)?;
        Ok(Detour {
            memory,
            target,
            replacement,
            config,
            state: Mutex::new(DetourState {
                original,
                ..DetourState::default()
            }),
        })
    }

    pub fn target(&self) -> Address {
        self.target.to_address()
    }

    pub fn replacement(&self) -> Address {
        self.replacement.to_address()
    }

    /// Bytes the patch overwrites
    pub fn original_bytes(&self) -> [u8; JUMP_SIZE] {
        self.state.lock().original
    }

    /// Trampoline address while one is allocated
    pub fn trampoline(&self) -> Option<Address> {
        self.state.lock().trampoline.map(|t| t.address)
    }

    /// Callable original behavior: the trampoline while applied, the target
    /// otherwise.
    ///
    /// # Safety
    /// The returned function must not be called after the detour is removed
    /// or dropped, since the trampoline is freed then.
    pub unsafe fn original(&self) -> F {
        let state = self.state.lock();
        match (state.applied, state.trampoline) {
            (true, Some(trampoline)) => F::from_address(trampoline.address),
            _ => self.target,
        }
    }

    /// Calls the original behavior whether or not the detour is applied.
    ///
    /// # Safety
    /// Any contract of the target function applies.
    pub unsafe fn call_original(&self, arguments: F::Arguments) -> F::Output {
        let original = self.original();
        original.call(arguments)
    }

    /// Writes the trampoline from the decoded `prefix` bytes, then patches
    /// the target
    fn build(&self, trampoline: Address, prefix: &[u8]) -> MemoryResult<()> {
        let target = self.target();
        let back = encode_jump(trampoline.add(prefix.len()), target.add(prefix.len()))?;
        let patch = encode_jump(target, self.replacement())?;

        let mut code = prefix.to_vec();
        code.extend_from_slice(&back);
        debug!(%trampoline, code = %hex::encode(&code), "Writing trampoline");
        self.memory.write_bytes(trampoline, &code)?;

        write_code(&self.memory, target, &patch)
    }
}

impl<F: Function> MemoryEdit for Detour<F> {
    fn address(&self) -> Address {
        self.target()
    }

    fn is_applied(&self) -> bool {
        self.state.lock().applied
    }

    fn apply(&self) -> MemoryResult<()> {
        let mut state = self.state.lock();
        if state.applied {
            return Ok(());
        }
        if let Some(leaked) = state.trampoline {
            return Err(MemoryError::TrampolineLeak(leaked.address.to_string()));
        }

        let target = self.target();
        let (prefix, prefix_len) =
            decode_prefix(&self.memory, target, JUMP_SIZE, self.config.decode_window).map_err(
                |decoded| MemoryError::DisassemblyFailed {
                    address: target.to_string(),
                    decoded,
                    required: JUMP_SIZE,
                },
            )?;

        if self.config.reject_relative_prefix {
            if let Some(relative) = prefix.iter().find(|instruction| instruction.is_relative) {
                return Err(MemoryError::UnrelocatableInstruction {
                    address: relative.address.to_string(),
                    instruction: relative.text.clone(),
                });
            }
        }

        let code: Vec<u8> = prefix
            .iter()
            .flat_map(|instruction| instruction.bytes.iter().copied())
            .collect();
        let mut original = [0u8; JUMP_SIZE];
        original.copy_from_slice(&code[..JUMP_SIZE]);

        let size = MIN_TRAMPOLINE_SIZE.max(prefix_len + JUMP_SIZE);
        let trampoline = self
            .memory
            .allocate(None, size, Protection::execute_read_write())?;

        if let Err(e) = self.build(trampoline, &code) {
            if let Err(free_error) = self.memory.free(trampoline) {
                warn!(%trampoline, error = %free_error, "Failed to free trampoline");
            }
            return Err(e);
        }

        state.original = original;
        state.trampoline = Some(Trampoline {
            address: trampoline,
            size,
        });
        state.applied = true;
        info!(
            %target,
            replacement = %self.replacement(),
            %trampoline,
            prefix_len,
            "Detour applied"
        );
        Ok(())
    }

    fn remove(&self) -> MemoryResult<()> {
        let mut state = self.state.lock();
        if !state.applied {
            return Ok(());
        }

        let target = self.target();
        write_code(&self.memory, target, &state.original)?;
        state.applied = false;

        if let Some(trampoline) = state.trampoline {
            match self.memory.free(trampoline.address) {
                Ok(()) => state.trampoline = None,
                Err(e) => warn!(
                    trampoline = %trampoline.address,
                    size = trampoline.size,
                    error = %e,
                    "Failed to free trampoline"
                ),
            }
        }
        info!(%target, "Detour removed");
        Ok(())
    }
}

impl<F: Function> Drop for Detour<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<F: Function> fmt::Debug for Detour<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Detour")
            .field("target", &self.target())
            .field("replacement", &self.replacement())
            .field("original", &hex::encode(state.original))
            .field("trampoline", &state.trampoline.map(|t| t.address))
            .field("applied", &state.applied)
            .finish()
    }
}
