//! # Error Types
//!
//! Errors raised by the collaborators that sit around the caching layer: the
//! origin data store and the configuration loader. Cache-internal failures live
//! in [`crate::caching::CacheError`].
//!
//! Origin errors are `Clone` because a single failed origin fetch is handed to
//! every caller that joined the same in-flight lookup.

use thiserror::Error;

/// Result type returned by origin collaborators and by the domain cache services.
pub type OriginResult<T> = Result<T, OriginError>;

/// Result type for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures reported by the origin store (database, configuration source).
///
/// "Not found" is *not* an error: origin lookups return `Ok(None)` for absent
/// rows so the gateway can cache the absence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OriginError {
    /// The backing store could not be reached
    #[error("Origin unavailable: {message}")]
    Unavailable { message: String },

    /// The query itself failed (constraint, decoding, bad input, ...)
    #[error("Origin query failed: {message}")]
    Query { message: String },

    /// The origin did not answer in time
    #[error("Origin timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl OriginError {
    /// Create an unavailable error with a custom message
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a query error with a custom message
    pub fn query<S: Into<String>>(message: S) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Configuration loading, parsing and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    Parse { message: String },

    #[error("Invalid configuration: {message}")]
    Validation { message: String },

    #[error("Config watcher error: {message}")]
    Watch { message: String },
}

impl ConfigError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

impl From<notify::Error> for ConfigError {
    fn from(err: notify::Error) -> Self {
        Self::Watch {
            message: err.to_string(),
        }
    }
}
