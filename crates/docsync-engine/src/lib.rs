//! Sync engine for docsync
//!
//! This crate runs the reconciliation core from `docsync-sync` against real
//! collaborators:
//!
//! - **Pass Execution**: scan, plan, safety check and sequential execution
//! - **Retries**: exponential backoff, jitter and per-call timeouts for remote calls
//! - **Background Sync**: debounced per-document syncs, periodic passes and failure parking
//! - **Logging**: tracing subscriber setup from configuration
//!
//! # Examples
//!
//! ```rust,no_run
//! use docsync_config::Config;
//! use docsync_engine::PassExecutor;
//! use docsync_sync::Collaborators;
//! use docsync_types::PassContext;
//!
//! # async fn example(collaborators: Collaborators) -> docsync_types::Result<()> {
//! let executor = PassExecutor::new(&Config::default(), collaborators)?;
//! let report = executor.run_pass(&PassContext::new(false)).await?;
//! println!("{} documents updated", report.stats.updated);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod executor;
pub mod logging;
pub mod retry;
pub mod scheduler;

pub use executor::{DocumentError, PassExecutor, PassReport};
pub use logging::init_logging;
pub use retry::{RetryPolicy, RetryingRemote};
pub use scheduler::{BackgroundHandle, BackgroundSyncManager, ManagerState, SyncRequestOutcome};
