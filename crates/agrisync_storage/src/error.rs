//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A journal record failed validation somewhere other than the tail.
    #[error("journal corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the bad record.
        offset: u64,
        /// What failed.
        reason: String,
    },

    /// A record is larger than the journal accepts.
    #[error("record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Writes were refused (fault injection or read-only store).
    #[error("storage is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            StorageError::ReadOnly => true,
            _ => false,
        }
    }
}
