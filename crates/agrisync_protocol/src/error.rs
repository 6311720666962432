//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or converting protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A typed entity could not be converted to or from a record body.
    #[error("entity conversion failed for {entity_type}: {message}")]
    Conversion {
        /// Entity type tag.
        entity_type: String,
        /// Underlying serde error.
        message: String,
    },

    /// Unknown enum code found in a persisted record.
    #[error("unknown {kind} code: {code}")]
    UnknownCode {
        /// Name of the enum being decoded.
        kind: &'static str,
        /// The offending code.
        code: u8,
    },
}

impl ProtocolError {
    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}

/// Encodes any serializable value as CBOR bytes.
pub fn to_cbor<T: serde::Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_helpers_roundtrip() {
        let value = vec![("a".to_string(), 1i64), ("b".to_string(), -7)];
        let bytes = to_cbor(&value).unwrap();
        let decoded: Vec<(String, i64)> = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn truncated_input_is_decoding_error() {
        let bytes = to_cbor(&"hello world").unwrap();
        let err = from_cbor::<String>(&bytes[..3]).unwrap_err();
        assert!(matches!(err, ProtocolError::DecodingFailed { .. }));
    }
}
