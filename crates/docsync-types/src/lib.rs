//! Core type system and error handling for docsync
//!
//! This crate provides the foundational types, error handling, and collaborator
//! traits used throughout the docsync workspace. It includes:
//!
//! - **Error handling**: one error taxonomy with retry and pass-abort classification
//! - **Core types**: remote identifiers, the typed metadata block, replica observations, pass statistics
//! - **Traits**: async seams for the remote client, local storage, metadata codec and host integration
//! - **Configuration**: policy enums and retry/timeout settings with validation
//!
//! # Examples
//!
//! ```rust
//! use docsync_types::{DocumentId, DocumentMetadata, Result, SyncStats};
//!
//! fn example_operation() -> Result<SyncStats> {
//!     let meta = DocumentMetadata {
//!         identifier: Some(DocumentId::new("R1")),
//!         ..Default::default()
//!     };
//!     assert!(meta.is_linked());
//!
//!     let mut stats = SyncStats::new();
//!     stats.updated = 1;
//!     stats.total = 1;
//!     Ok(stats)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{ConflictPolicy, CrossDomainPolicy, DeleteHandling, RetryConfig, TimeoutConfig};
pub use error::{Error, ErrorKind};
pub use result::Result;
pub use traits::*;
pub use types::*;
