//! Configuration management system for docsync
//!
//! This crate provides the configuration tree recognised by the docsync
//! engines, supporting multiple file formats (YAML, TOML, JSON), validation,
//! and environment variable overrides.
//!
//! # Features
//!
//! - **Multiple formats**: YAML, TOML and JSON configuration files
//! - **Validation**: bad configuration fails before any pass starts
//! - **Environment overrides**: `DOCSYNC__POLICY__CONFLICT_POLICY=prefer-remote`
//! - **Defaults**: sensible defaults for every option
//!
//! # Examples
//!
//! ```rust,no_run
//! use docsync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_source_file("docsync.yaml")
//!     .add_env_prefix("DOCSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Conflict policy: {}", config.policy.conflict_policy);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use docsync_types::{ConflictPolicy, CrossDomainPolicy, DeleteHandling, RetryConfig, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for docsync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reconciliation policy
    pub policy: PolicyConfig,
    /// Local and remote folder layout
    pub folders: FolderConfig,
    /// Remote call behaviour
    pub remote: RemoteConfig,
    /// Background scheduling
    pub background: BackgroundConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Reconciliation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Branch of the conflict resolver used when both sides changed
    pub conflict_policy: ConflictPolicy,
    /// Whether moves are detected and propagated
    pub sync_moves: bool,
    /// What happens locally when the remote document is deleted or trashed
    pub delete_handling: DeleteHandling,
    /// How long archived documents are kept
    pub archive_retention_days: u32,
    /// What happens to linked documents whose identifier cannot be read
    pub cross_domain_policy: CrossDomainPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Merge,
            sync_moves: true,
            delete_handling: DeleteHandling::Archive,
            archive_retention_days: 30,
            cross_domain_policy: CrossDomainPolicy::Warn,
        }
    }
}

/// Local and remote folder layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// Vault-relative prefix managed by the engine (empty for the whole vault)
    pub local_base: String,
    /// Remote folder that mirrors `local_base` (empty for the remote root)
    pub remote_root: String,
    /// Extension of managed documents, without the dot
    pub extension: String,
    /// Vault-relative folder receiving archived documents
    pub archive_folder: String,
    /// Detect moves made on the remote side
    ///
    /// Off by default: a remote move is only reported for documents whose
    /// path survives the folder mapping round trip unchanged.
    pub detect_remote_moves: bool,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            local_base: String::new(),
            remote_root: String::new(),
            extension: "md".to_string(),
            archive_folder: ".sync-archive".to_string(),
            detect_remote_moves: false,
        }
    }
}

/// Remote call behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Retry policy for transient failures
    pub retry: RetryConfig,
    /// Per-request timeouts
    pub timeouts: TimeoutConfig,
    /// Concurrency limit for independent sub-requests within one document
    pub prefetch_concurrency: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            prefetch_concurrency: 4,
        }
    }
}

/// Background scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Whether the periodic pass runs at all
    pub enabled: bool,
    /// Interval between periodic full passes
    pub poll_interval: Duration,
    /// Quiet period before a queued document is synced
    pub debounce_window: Duration,
    /// Consecutive failures after which a document is parked
    pub failure_threshold: u32,
    /// How often the queue is checked for settled documents
    pub tick_interval: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300),
            debounce_window: Duration::from_secs(1),
            failure_threshold: 3,
            tick_interval: Duration::from_millis(250),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
