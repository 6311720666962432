//! # AgriSync Protocol
//!
//! Pure types shared by the AgriSync offline sync engine.
//!
//! This crate provides:
//! - [`SyncableEntity`] and the generic [`EntityRecord`] document
//! - [`ConflictResolver`] with per-domain default strategies
//! - [`QueuedOperation`] for the offline operation queue
//! - [`SyncPriority`] classes and the domain catalogue
//! - CBOR wire messages for remote gateways
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
pub mod domain;
mod entity;
mod error;
mod messages;
mod operation;
mod priority;

pub use conflict::{
    ConflictResolver, ConflictResult, ConflictStrategy, Winner, DELETED_MARKER, IMPORTANT_FIELDS,
    MAX_AUTO_MERGE_FIELDS,
};
pub use entity::{EntityKey, EntityRecord, SyncableEntity, Timestamp};
pub use error::{from_cbor, to_cbor, ProtocolError, ProtocolResult};
pub use messages::{FetchRequest, FetchResponse, PushRequest, PushResponse, PROTOCOL_VERSION};
pub use operation::{
    encode_payload, OperationState, OperationType, QueuedOperation, DEFAULT_MAX_RETRIES,
};
pub use priority::SyncPriority;
