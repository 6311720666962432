//! Queued offline operations.
//!
//! A [`QueuedOperation`] is one local mutation that the remote has not yet
//! acknowledged. State transitions are enforced by the queue; this module
//! only describes which transitions are legal.

use crate::entity::{EntityKey, EntityRecord, Timestamp};
use crate::error::{from_cbor, to_cbor, ProtocolError, ProtocolResult};
use crate::priority::SyncPriority;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default retry budget for a queued operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl OperationType {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            OperationType::Create => 1,
            OperationType::Update => 2,
            OperationType::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        match code {
            1 => Ok(OperationType::Create),
            2 => Ok(OperationType::Update),
            3 => Ok(OperationType::Delete),
            _ => Err(ProtocolError::UnknownCode {
                kind: "operation type",
                code,
            }),
        }
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a drain cycle.
    InProgress,
    /// Acknowledged by the remote.
    Completed,
    /// Last attempt failed; may be re-claimed while retries remain.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl OperationState {
    /// Returns true if no further automatic transition is possible.
    ///
    /// `Failed` is not terminal by state alone; see
    /// [`QueuedOperation::is_exhausted`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Cancelled)
    }

    /// Returns true if `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Failed, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (Pending, Cancelled)
                | (Failed, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "PENDING",
            OperationState::InProgress => "IN_PROGRESS",
            OperationState::Completed => "COMPLETED",
            OperationState::Failed => "FAILED",
            OperationState::Cancelled => "CANCELLED",
        }
    }

    /// Parses a state name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Some(OperationState::Pending),
            "IN_PROGRESS" => Some(OperationState::InProgress),
            "COMPLETED" => Some(OperationState::Completed),
            "FAILED" => Some(OperationState::Failed),
            "CANCELLED" => Some(OperationState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One not-yet-confirmed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique operation identifier.
    pub operation_id: String,
    /// Entity type tag.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Kind of mutation.
    pub operation_type: OperationType,
    /// Serialized entity snapshot.
    pub payload: Vec<u8>,
    /// Priority class; lower ordinal drains first.
    pub priority: SyncPriority,
    /// Lifecycle state.
    pub state: OperationState,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Time of the last claim.
    pub last_attempt_at: Option<Timestamp>,
    /// Time of acknowledgment.
    pub completed_at: Option<Timestamp>,
    /// Message from the last failure.
    pub error_message: Option<String>,
    /// Insertion sequence, breaks `created_at` ties.
    pub sequence: u64,
}

impl QueuedOperation {
    /// Creates a pending operation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation_type: OperationType,
        payload: Vec<u8>,
        priority: SyncPriority,
        created_at: Timestamp,
        sequence: u64,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation_type,
            payload,
            priority,
            state: OperationState::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at,
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
            sequence,
        }
    }

    /// Returns the entity this operation mutates.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_type, &self.entity_id)
    }

    /// Returns true if a drain cycle may claim this operation.
    pub fn is_claimable(&self) -> bool {
        match self.state {
            OperationState::Pending => true,
            OperationState::Failed => self.retry_count < self.max_retries,
            _ => false,
        }
    }

    /// Returns true if the operation failed and has no retries left.
    pub fn is_exhausted(&self) -> bool {
        self.state == OperationState::Failed && self.retry_count >= self.max_retries
    }

    /// Drain order: priority, then creation time, then insertion sequence.
    pub fn drain_order(&self) -> (SyncPriority, Timestamp, u64) {
        (self.priority, self.created_at, self.sequence)
    }

    /// Decodes the payload as an entity snapshot.
    pub fn record(&self) -> ProtocolResult<EntityRecord> {
        from_cbor(&self.payload)
    }
}

/// Encodes an entity snapshot as an operation payload.
pub fn encode_payload(record: &EntityRecord) -> ProtocolResult<Vec<u8>> {
    to_cbor(record)
}
