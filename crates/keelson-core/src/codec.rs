//! Serialization of task arguments, outputs and event payloads into the bytes
//! the checkpoint store persists.

use keelson_types::error::WorkflowError;
use serde_json::Value;

/// Converts values to and from storable bytes.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Compact JSON encoding. The default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode bytes: {0}")]
    Decode(String),
}

impl From<CodecError> for WorkflowError {
    fn from(err: CodecError) -> Self {
        WorkflowError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_preserves_nested_values() {
        let codec = JsonCodec;
        let value = json!({"result": [1, 2.5, "x"], "error": null});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let err = JsonCodec.decode(b"\x00not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));

        let err: WorkflowError = err.into();
        assert!(err.to_string().starts_with("codec error"));
    }
}
