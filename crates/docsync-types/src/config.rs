//! Configuration types for docsync
//!
//! This module provides the policy enums and the retry/timeout settings shared
//! between the configuration crate and the engines that consume them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the conflict resolver reconciles a document changed on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Newer modification time wins; ties favor the local side
    LastWriteWins,
    /// Always keep the remote content
    PreferRemote,
    /// Always keep the local content
    PreferLocal,
    /// Three-way text merge against the last synced ancestor
    #[default]
    Merge,
}

/// What happens to a local document whose remote counterpart was deleted or trashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteHandling {
    /// Move the local file into a dated retention folder
    #[default]
    Archive,
    /// Leave the local file alone, only record the deletion
    Ignore,
    /// Hard-delete the local file
    Sync,
}

/// What happens to a linked document whose identifier cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CrossDomainPolicy {
    /// Exclude the document from the pass
    Skip,
    /// Record a warning and exclude the document
    #[default]
    Warn,
    /// Re-link by path, or recreate when nothing matches
    AutoRelink,
}

macro_rules! kebab_enum_str {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Configuration spelling of this value
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    )),
                }
            }
        }
    };
}

kebab_enum_str!(ConflictPolicy {
    LastWriteWins => "last-write-wins",
    PreferRemote => "prefer-remote",
    PreferLocal => "prefer-local",
    Merge => "merge",
});

kebab_enum_str!(DeleteHandling {
    Archive => "archive",
    Ignore => "ignore",
    Sync => "sync",
});

kebab_enum_str!(CrossDomainPolicy {
    Skip => "skip",
    Warn => "warn",
    AutoRelink => "auto-relink",
});

/// Retry configuration for remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Random extra delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, String> {
        let config = Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter_factor: 0.1,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Check the invariants of this configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier <= 1.0 {
            return Err("Backoff multiplier must be greater than 1.0".to_string());
        }
        if self.initial_delay > self.max_delay {
            return Err("Initial delay cannot be greater than max delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("Jitter factor must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Calculate the delay for a given retry attempt, before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Timeout configuration for remote calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout applied to each individual remote request
    pub request_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}
