//! JSON codec using `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Codec;
use crate::error::Result;

/// JSON codec.
///
/// Decoding requires the whole input to be one JSON value; a partially
/// received document is an error, not a partial value.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const NAME: &'static str = "json";

    #[inline]
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SocketError;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Greeting {
        name: String,
        count: u32,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Greeting {
            name: "Hello".to_string(),
            count: 2,
        };
        let encoded = JsonCodec::encode(&original).unwrap();
        assert_eq!(encoded, br#"{"name":"Hello","count":2}"#);

        let decoded: Greeting = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_partial_document_is_error() {
        let result: Result<Greeting> = JsonCodec::decode(br#"{"name":"Hel"#);
        assert!(matches!(result, Err(SocketError::Json(_))));
    }

    #[test]
    fn test_trailing_bytes_are_error() {
        let result: Result<u32> = JsonCodec::decode(b"1 2");
        assert!(result.is_err());
    }

    #[test]
    fn test_surrounding_whitespace_is_accepted() {
        let decoded: Vec<u8> = JsonCodec::decode(b" [1,2]\n").unwrap();
        assert_eq!(decoded, vec![1, 2]);
    }
}
