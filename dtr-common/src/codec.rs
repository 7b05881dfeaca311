//! Wire codec for driver messages.
//!
//! Messages are JSON documents carried in length-prefixed frames. The codec
//! itself knows nothing about framing; see `dtr_client::transport` for that.

use crate::errors::ProtocolError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Largest frame either side will accept (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serializer/deserializer for protocol messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerDe;

impl SerDe {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a message into the bytes of one frame.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let bytes = serde_json::to_vec(value).map_err(|source| ProtocolError::Encode {
            what: std::any::type_name::<T>(),
            source,
        })?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(bytes)
    }

    /// Deserialize the bytes of one frame.
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|source| ProtocolError::Decode {
            what: std::any::type_name::<T>(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_produces_json() {
        let serde = SerDe::new();
        let bytes = serde.serialize(&json!({"ok": true})).unwrap();
        assert_eq!(bytes, br#"{"ok":true}"#);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let serde = SerDe::new();
        let err = serde.deserialize::<serde_json::Value>(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { .. }));
        assert!(err.to_string().starts_with("failed to decode"));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let serde = SerDe::new();
        let big = "x".repeat(MAX_FRAME_LEN + 1);
        let err = serde.serialize(&big).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }
}
