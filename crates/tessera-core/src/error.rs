//! Error types for Tessera operations
//!
//! Two layers: [`StoreError`] describes failures inside a durable backing
//! store, and [`EngineError`] is what every public engine operation returns.
//! A backing-store failure reaches the caller unmodified inside
//! [`EngineError::BackingStore`].
//!
//! "Key not found" is not an error in either enum. Lookups report it
//! through [`crate::Lookup::NotFound`] so callers can tell an absent key from
//! an unavailable store.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Backing store error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error in {}: {message} ({kind})", .path.display())]
    Io {
        /// The file path where the error occurred
        path: PathBuf,
        /// Human-readable description
        message: String,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
    },

    /// Log file contents cannot be interpreted
    #[error("log corrupted in {} at offset {offset}: {reason}", .path.display())]
    Corrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Record checksum did not match its payload
    #[error("checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// Record header promises more bytes than the file holds
    #[error("torn write in {} at offset {offset}: expected {expected} bytes, only {available} available", .path.display())]
    TornWrite {
        path: PathBuf,
        offset: u64,
        expected: u64,
        available: u64,
    },

    /// Key or value too large for the record format
    #[error("entry {component} too large: {size} bytes exceeds limit of {max} bytes")]
    OversizedEntry {
        /// "key" or "value"
        component: &'static str,
        size: u64,
        max: u64,
    },

    /// Store refused the operation (remote storage down, injected fault)
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Wrap an I/O error with the path and action that produced it.
    pub fn io(path: impl Into<PathBuf>, action: &str, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            message: format!("{}: {}", action, err),
            kind: err.kind(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            path: PathBuf::from("<unknown>"),
            message: err.to_string(),
            kind: err.kind(),
        }
    }
}

/// Error classification for retry decisions.
///
/// - `UserError`: malformed request, retrying unchanged cannot succeed
/// - `Retryable`: time budget ran out or the caller cancelled; nothing was applied
/// - `Unavailable`: persistence layer failed; the mutation was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Unavailable,
}

/// Error returned by every public engine operation.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Empty or oversized key, oversized value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request's deadline passed before it could run
    #[error("deadline exceeded after {waited:?} waiting for {operation}")]
    DeadlineExceeded {
        operation: &'static str,
        waited: Duration,
    },

    /// The request's cancel token fired before it could run
    #[error("{operation} cancelled by caller")]
    Cancelled { operation: &'static str },

    /// Persistence failed; the index was left untouched
    #[error("backing store error: {0}")]
    BackingStore(#[from] StoreError),

    /// Engine configuration rejected at open time
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) | EngineError::Config(_) => ErrorKind::UserError,
            EngineError::DeadlineExceeded { .. } | EngineError::Cancelled { .. } => ErrorKind::Retryable,
            EngineError::BackingStore(_) => ErrorKind::Unavailable,
        }
    }

    /// Stable short code for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::DeadlineExceeded { .. } => "deadline_exceeded",
            EngineError::Cancelled { .. } => "cancelled",
            EngineError::BackingStore(_) => "backing_store",
            EngineError::Config(_) => "config",
        }
    }

    /// Whether resubmitting the identical request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

/// Result type alias for backing store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
