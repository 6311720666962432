//! Wire messages for HTTP-style remote gateways.
//!
//! All messages are CBOR maps produced by serde; field names are the wire
//! names.

use crate::entity::{EntityRecord, Timestamp};
use crate::error::{from_cbor, to_cbor, ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Request for remote rows changed after a watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Requesting device.
    pub device_id: String,
    /// Domain to fetch.
    pub entity_type: String,
    /// Exclusive lower bound on `updated_at`.
    pub since: Timestamp,
    /// Maximum rows to return.
    pub limit: u32,
}

impl FetchRequest {
    /// Creates a fetch request.
    pub fn new(
        device_id: impl Into<String>,
        entity_type: impl Into<String>,
        since: Timestamp,
        limit: u32,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id: device_id.into(),
            entity_type: entity_type.into(),
            since,
            limit,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Rows changed after the requested watermark, ascending by `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Changed rows.
    pub records: Vec<EntityRecord>,
    /// True if more rows are available past this page.
    #[serde(default)]
    pub has_more: bool,
}

impl FetchResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR and checks that rows are ascending by `updated_at`.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let response: Self = from_cbor(bytes)?;
        if response
            .records
            .windows(2)
            .any(|w| w[0].updated_at > w[1].updated_at)
        {
            return Err(ProtocolError::decoding_failed(
                "fetch response rows are not ordered by updated_at",
            ));
        }
        Ok(response)
    }
}

/// Batch of locally dirty rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Pushing device.
    pub device_id: String,
    /// Domain of every row in the batch.
    pub entity_type: String,
    /// Rows to write.
    pub records: Vec<EntityRecord>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(
        device_id: impl Into<String>,
        entity_type: impl Into<String>,
        records: Vec<EntityRecord>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id: device_id.into(),
            entity_type: entity_type.into(),
            records,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Acknowledgment of a push batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Number of rows the remote accepted.
    pub acknowledged: u32,
}

impl PushResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}
