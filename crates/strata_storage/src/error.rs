//! Error types for the engine and its log stores.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by [`crate::KvEngine`] implementations and log stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log read reached past the bytes written so far.
    #[error("log read of {len} bytes at offset {offset} exceeds size {size}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Bytes in the store.
        size: u64,
    },

    /// A log store was asked to grow through `truncate`.
    #[error("cannot truncate log to {requested} bytes, it holds {size}")]
    TruncateBeyondEnd {
        /// Requested length.
        requested: u64,
        /// Bytes in the store.
        size: u64,
    },

    /// A log record failed its checksum or does not parse.
    #[error("corrupt log record: {0}")]
    CorruptLog(String),

    /// No tree of that name exists.
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// The engine was closed.
    #[error("engine is closed")]
    Closed,
}
