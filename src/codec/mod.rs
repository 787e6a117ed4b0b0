//! Codec module - typed values to and from buffered bytes.
//!
//! - [`JsonCodec`] - JSON using `serde_json`
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//!
//! Codecs are marker structs selected at compile time through the
//! [`Codec`] trait, e.g. `reader.read_decoded::<JsonCodec, Reply>(timeout)`.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let encoded = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(encoded, b"[1,2,3]");
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A serialization format for whole-buffer payloads.
pub trait Codec {
    /// Short name for log output.
    const NAME: &'static str;

    /// Encode a value to bytes.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>>;

    /// Decode a value from bytes.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
