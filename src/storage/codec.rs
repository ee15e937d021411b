use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CacheError;

/// Encoder/decoder used for every `.p` payload file.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encode a typed record through a codec.
pub fn encode_typed<T: Serialize>(codec: &dyn PayloadCodec, value: &T) -> Result<Vec<u8>, CacheError> {
    let value = serde_json::to_value(value)?;
    codec.encode(&value)
}

/// Decode a typed record through a codec.
pub fn decode_typed<T: DeserializeOwned>(
    codec: &dyn PayloadCodec,
    bytes: &[u8],
) -> Result<T, CacheError> {
    let value = codec.decode(bytes)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_rejects_truncated_payload() {
        let bytes = JsonCodec.encode(&json!({"ret": [1, 2, 3]})).expect("encode");
        let err = JsonCodec.decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn test_typed_decode_into_list() {
        let bytes = JsonCodec.encode(&json!(["w1", "w2"])).expect("encode");
        let workers: Vec<String> = decode_typed(&JsonCodec, &bytes).expect("decode");
        assert_eq!(workers, vec!["w1", "w2"]);
    }
}
