//! Process tracking and the OS seam
//!
//! [`ProcessRegistry`] owns one [`ProcessContext`] per process id. All OS
//! primitives go through the [`OsBackend`] trait.

pub mod context;
pub mod handle;
pub mod os;

#[cfg(test)]
pub(crate) mod fake;

pub use context::{ProcessContext, ProcessRegistry};
pub use handle::ProcessHandle;
pub use os::{LoadMode, OsBackend, OsHandle, ProcessAccess, SpawnedProcess, Space, WaitOutcome};
