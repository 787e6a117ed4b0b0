//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named`, i.e. as maps keyed by field
//! name. Peers written against other MessagePack libraries expect that
//! layout; `to_vec` would emit positional arrays.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, MsgPackCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Reading {
//!     sensor: u32,
//!     value: f64,
//! }
//!
//! let reading = Reading { sensor: 7, value: 21.5 };
//! let encoded = MsgPackCodec::encode(&reading).unwrap();
//! let decoded: Reading = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, reading);
//! ```

use std::io::Cursor;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Codec;
use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    #[inline]
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, not to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode exactly one value. Bytes left over after it are an error, so a
    /// buffer holding the start of a second message never counts as decoded.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let mut deserializer = rmp_serde::Deserializer::new(Cursor::new(bytes));
        let value = T::deserialize(&mut deserializer)?;

        let consumed = deserializer.get_ref().position() as usize;
        if consumed != bytes.len() {
            return Err(rmp_serde::decode::Error::Syntax(format!(
                "{} trailing bytes after value",
                bytes.len() - consumed
            ))
            .into());
        }
        Ok(value)
    }
}
