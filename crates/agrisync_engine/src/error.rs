//! Error types for the sync engine.

use agrisync_protocol::{OperationState, ProtocolError};
use agrisync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A gateway call did not return within the configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The gateway is disconnected.
    #[error("not connected to remote")]
    NotConnected,

    /// Durable storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol value could not be encoded, decoded or converted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed wire payload.
    #[error("codec error: {0}")]
    Codec(String),

    /// The remote acknowledged fewer rows than were pushed.
    #[error("push partially acknowledged: {acknowledged} of {expected}")]
    PartialAck {
        /// Rows pushed.
        expected: usize,
        /// Rows acknowledged.
        acknowledged: usize,
    },

    /// No queued operation with this id.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// Illegal queue state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: OperationState,
        /// Attempted target state.
        to: OperationState,
    },

    /// No pending conflict for this entity.
    #[error("no pending conflict for {0}")]
    NoPendingConflict(String),

    /// The local row changed after its conflict was escalated.
    #[error("local row changed since the conflict was escalated: {0}")]
    ConflictChanged(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Another pass holds the sync lock.
    #[error("a sync pass is already running")]
    AlreadyRunning,

    /// The conflict resolver could not settle a pair of rows.
    #[error("conflict resolution failed: {0}")]
    Conflict(String),

    /// Local store failure reported by the host.
    #[error("local store error: {0}")]
    Store(String),

    /// A queue processor rejected an operation.
    #[error("processor error: {0}")]
    Processor(String),

    /// No domain registered under this name.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for transient I/O that a later attempt may get past.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::PartialAck { .. }
            | SyncError::AlreadyRunning => true,
            SyncError::Storage(e) => e.is_transient() || matches!(e, StorageError::Io(_)),
            _ => false,
        }
    }
}
