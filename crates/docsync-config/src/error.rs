//! Configuration errors

use docsync_types::Error as DocsyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded, saved or accepted
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read or written
    #[error("Cannot access config file '{path}': {source}")]
    Io {
        /// Configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A configuration file is not valid YAML, TOML or JSON
    #[error("Cannot parse config file '{path}': {message}")]
    Parse {
        /// Configuration file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The configuration breaks a rule spanning several keys
    #[error("Invalid configuration: {message}")]
    Validation {
        /// What is wrong
        message: String,
    },

    /// One key holds an unusable value
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue {
        /// Dotted key, e.g. `policy.archive_retention_days`
        key: String,
        /// What is wrong
        message: String,
    },

    /// A `DOCSYNC__*` variable could not be applied
    #[error("Cannot apply environment override: {message}")]
    Environment {
        /// What is wrong
        message: String,
    },

    /// The configuration could not be rendered for saving
    #[error("Cannot serialize configuration: {message}")]
    Serialization {
        /// Serializer message
        message: String,
    },

    /// Anything else
    #[error("Configuration error: {message}")]
    Other {
        /// What is wrong
        message: String,
    },
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        let message = error.to_string();
        match error {
            config::ConfigError::FileParse { uri, cause } => Self::Parse {
                path: uri.map(PathBuf::from).unwrap_or_default(),
                message: cause.to_string(),
            },
            config::ConfigError::Type {
                origin: Some(origin),
                ..
            } if origin.contains("environment") => Self::Environment { message },
            config::ConfigError::Type { key: Some(key), .. } => Self::InvalidValue { key, message },
            config::ConfigError::NotFound(key) => Self::InvalidValue {
                key,
                message: "missing".to_string(),
            },
            _ => Self::Other { message },
        }
    }
}

impl From<ConfigError> for DocsyncError {
    fn from(error: ConfigError) -> Self {
        DocsyncError::validation(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an error for one bad key
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an error not covered by another variant
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}
