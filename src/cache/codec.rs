//! Value Codec Module
//!
//! Encodes cached values into the byte payload stored in SQLite and back.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Codec Trait ==
/// Encoder/decoder pair for cached values.
///
/// Anything implementing serde's `Serialize` and `DeserializeOwned`
/// round-trips through a codec, so arbitrary value graphs can be cached
/// without the engine knowing their shape.
pub trait Codec {
    /// Encodes a value to its stored byte representation.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decodes a stored byte representation back into a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

// == JSON Codec ==
/// Default codec: self-describing JSON payloads.
///
/// Decoding is type-checked, which is what lets counter operations tell
/// an integer from everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Encoding(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Encoding(e.to_string()))
    }
}

// == Bincode Codec ==
/// Compact binary codec.
///
/// Payloads are smaller than JSON but carry no type information, so
/// counter operations only behave for values that were stored as `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| CacheError::Encoding(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| CacheError::Encoding(e.to_string()))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        logins: u32,
        tags: Vec<String>,
    }

    fn sample() -> Session {
        Session {
            user: "alice".to_string(),
            logins: 3,
            tags: vec!["admin".to_string(), "beta".to_string()],
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let encoded = JsonCodec.encode(&sample()).unwrap();
        let decoded: Session = JsonCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_bincode_roundtrip() {
        let encoded = BincodeCodec.encode(&sample()).unwrap();
        let decoded: Session = BincodeCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_json_decode_type_checked() {
        let encoded = JsonCodec.encode("not a number").unwrap();
        assert!(matches!(
            JsonCodec.decode::<i64>(&encoded),
            Err(CacheError::Encoding(_))
        ));
    }

    #[test]
    fn test_json_decode_garbage_fails() {
        assert!(matches!(
            JsonCodec.decode::<String>(b"\x00\xff\x00"),
            Err(CacheError::Encoding(_))
        ));
    }

    #[test]
    fn test_json_encode_rejects_non_string_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "pair");
        assert!(matches!(
            JsonCodec.encode(&map),
            Err(CacheError::Encoding(_))
        ));
    }
}
