//! Error types and handling for docsync
//!
//! This module provides the error taxonomy shared by every docsync crate. Each
//! variant carries enough context (document identifier, path, reason) for an
//! operator to act on it, and the helper methods classify errors into the
//! transient / per-document / fatal buckets the pass driver relies on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main error type for docsync operations
#[derive(thiserror::Error, Debug, Clone, Serialize, Deserialize)]
pub enum Error {
    /// Credentials are invalid or expired
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Message reported by the remote service
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {seconds} seconds")]
    Timeout {
        /// Number of seconds after which the operation timed out
        seconds: u64,
    },

    /// The remote service asked us to slow down
    #[error("Rate limited by remote service")]
    RateLimited {
        /// Minimum wait requested by the server, in milliseconds
        retry_after_ms: Option<u64>,
    },

    /// The identifier belongs to an account or domain this session cannot read
    #[error("Access to remote document '{identifier}' is forbidden")]
    Forbidden {
        /// Remote document identifier
        identifier: String,
    },

    /// The remote document does not exist
    #[error("Remote document not found: {identifier}")]
    NotFound {
        /// Remote document identifier
        identifier: String,
    },

    /// Bad configuration
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The metadata block of a document could not be decoded or encoded
    #[error("Metadata error in '{path}': {message}")]
    Decode {
        /// Path of the offending document
        path: String,
        /// Parser message
        message: String,
    },

    /// Local storage failure
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Both sides changed and the configured policy could not reconcile them
    #[error("Unresolved conflict for '{path}' ({identifier})")]
    ConflictUnresolved {
        /// Local path of the document
        path: String,
        /// Remote document identifier
        identifier: String,
    },

    /// A plan was refused because it contains blocking warnings
    #[error("Sync plan is unsafe: {blocking} blocking warning(s)")]
    PlanUnsafe {
        /// Number of blocking warnings in the plan
        blocking: usize,
    },

    /// A move or restore target already exists
    #[error("Path collision at '{}'", path.display())]
    PathCollision {
        /// Path that is already occupied
        path: PathBuf,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Authentication errors
    Authentication,
    /// Transient remote errors (network, timeout, rate limit)
    Transient,
    /// Remote document lookups (not found, forbidden)
    Lookup,
    /// Configuration errors
    Validation,
    /// Metadata codec errors
    Decode,
    /// Local storage errors
    Io,
    /// Conflicts that need a human
    Conflict,
    /// Plan refused
    Plan,
    /// Cancellation
    Cancelled,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => {
                ErrorKind::Transient
            }
            Self::Forbidden { .. } | Self::NotFound { .. } => ErrorKind::Lookup,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Io { .. } => ErrorKind::Io,
            Self::ConflictUnresolved { .. } | Self::PathCollision { .. } => ErrorKind::Conflict,
            Self::PlanUnsafe { .. } => ErrorKind::Plan,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Check if this error should trigger a retry with backoff
    pub fn should_retry(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if this error must abort the whole pass instead of one document
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Validation { .. } | Self::PlanUnsafe { .. }
        )
    }

    /// Minimum wait requested by the server, if any
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(identifier: S) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a new forbidden error
    pub fn forbidden<S: Into<String>>(identifier: S) -> Self {
        Self::Forbidden {
            identifier: identifier.into(),
        }
    }

    /// Create a new path collision error
    pub fn path_collision<P: Into<PathBuf>>(path: P) -> Self {
        Self::PathCollision { path: path.into() }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    proptest! {
        #[test]
        fn test_transient_errors_always_retry(message in ".*", seconds in 1u64..3600u64) {
            for error in [
                Error::network(message.clone()),
                Error::Timeout { seconds },
                Error::RateLimited { retry_after_ms: Some(seconds) },
            ] {
                prop_assert_eq!(error.kind(), ErrorKind::Transient);
                prop_assert!(error.should_retry());
                prop_assert!(!error.is_fatal_to_pass());
            }
        }
    }

    #[rstest]
    #[case(Error::authentication("expired token"), true)]
    #[case(Error::validation("bad policy"), true)]
    #[case(Error::PlanUnsafe { blocking: 2 }, true)]
    #[case(Error::network("reset"), false)]
    #[case(Error::decode("a.md", "bad yaml"), false)]
    #[case(Error::ConflictUnresolved { path: "a.md".into(), identifier: "R1".into() }, false)]
    fn test_fatal_classification(#[case] error: Error, #[case] fatal: bool) {
        assert_eq!(error.is_fatal_to_pass(), fatal);
    }

    #[test]
    fn test_authentication_is_not_retried() {
        let error = Error::authentication("expired");
        assert_eq!(error.kind(), ErrorKind::Authentication);
        assert!(!error.should_retry());
        assert!(error.is_fatal_to_pass());
    }

    #[test]
    fn test_retry_after() {
        let error = Error::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert_eq!(
            error.retry_after(),
            Some(std::time::Duration::from_millis(1500))
        );
        assert_eq!(Error::network("x").retry_after(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "test file");
        let error = Error::from(io_error);

        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(error.to_string().contains("test file"));
        assert!(!error.should_retry());
    }

    #[test]
    fn test_path_collision_display() {
        let error = Error::PathCollision {
            path: PathBuf::from("notes/a.md"),
        };
        assert!(error.to_string().contains("notes/a.md"));
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }
}
