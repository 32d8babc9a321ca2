//! Shared Error Types
//!
//! This module defines the error taxonomy of the offline action queue.
//!
//! # Error Categories
//!
//! - `Storage` - the durable store could not persist or read a record
//! - `TransientRemote` - a remote call failed in a way that may succeed later
//! - `PermanentRemote` - a remote call failed in a way that retrying cannot fix
//! - `NotFound` - an action id is no longer in the store
//! - `UnknownKind` - no executor is registered for an action kind
//!
//! Executors report failures with the narrower [`ExecutorError`], which the
//! sync coordinator converts into store updates. Only `Storage` is meant to
//! reach the original caller of `enqueue_or_execute`.
//!
//! # Usage
//!
//! ```rust
//! use doublecheck_sync::shared::error::{ExecutorError, QueueError};
//!
//! let err = ExecutorError::transient("HTTP 503: upstream unavailable");
//! assert!(err.is_transient());
//!
//! let err: QueueError = err.into();
//! assert!(matches!(err, QueueError::TransientRemote { .. }));
//! ```
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the action queue
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The durable store failed (quota exceeded, corruption, serialization)
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// A remote operation failed in a plausibly transient way
    #[error("Transient remote error: {message}")]
    TransientRemote {
        /// Human-readable error message
        message: String,
    },

    /// A remote operation failed in a way that will not succeed on retry
    #[error("Permanent remote error: {message}")]
    PermanentRemote {
        /// Human-readable error message
        message: String,
    },

    /// The referenced action is not in the store
    #[error("Action not found: {id}")]
    NotFound {
        /// The missing action id
        id: String,
    },

    /// No executor is registered for the action kind
    #[error("No executor registered for kind '{kind}'")]
    UnknownKind {
        /// The unregistered kind tag
        kind: String,
    },
}

impl QueueError {
    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Whether this error is a `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(format!("SQLite error: {}", err))
    }
}

/// Failure reported by a remote operation executor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Timeout, 5xx, network unreachable
    #[error("{0}")]
    Transient(String),
    /// Validation failure, 4xx
    #[error("{0}")]
    Permanent(String),
}

impl ExecutorError {
    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ExecutorError> for QueueError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Transient(message) => Self::TransientRemote { message },
            ExecutorError::Permanent(message) => Self::PermanentRemote { message },
        }
    }
}
