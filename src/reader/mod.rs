//! Reading from a connection's receive buffer.
//!
//! - [`split_frame`] and friends implement delimiter framing over raw bytes
//! - [`FramedReader`] applies raw, delimited and typed reads to a ready
//!   [`Connection`](crate::connection::Connection), waiting with a bounded
//!   poll where the data may not have arrived yet

mod frame;
mod framed;

pub use frame::{find_delimiter, segments, split_frame};
pub use framed::{FramedReader, DEFAULT_READ_TIMEOUT};
