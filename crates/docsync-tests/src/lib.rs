//! docsync integration testing support
//!
//! In-memory implementations of every collaborator trait, with failure
//! injection, used by the end-to-end tests under `tests/`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// In-memory collaborators
///
/// Remote service, local storage and snapshot store that keep everything in
/// maps and record every write.
pub mod test_utils;

pub use test_utils::{Harness, MemoryLocal, MemoryRemote, MemorySnapshots};
