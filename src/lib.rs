//! # sockwire
//!
//! Byte-stream connections over TCP: connection lifecycle, receive
//! buffering and timeout-bounded framed reads, for clients and servers.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): the byte stream. Publishes state
//!   changes, serves receive and send requests, can be cancelled.
//! - **Connection** ([`connection`]): lifecycle state machine over one
//!   transport. A driver task per connection owns the receive loop and
//!   appends to the [`ReceiveBuffer`]; sends go through an ordered queue.
//! - **Reader** ([`reader`]): raw, delimited and typed reads over the buffer,
//!   bounded by a timeout.
//! - **Server** ([`server`]): accept loop, connection registry and a
//!   pluggable per-payload handler.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockwire::server::{EchoHandler, SocketServer};
//! use sockwire::SocketClient;
//!
//! #[tokio::main]
//! async fn main() -> sockwire::Result<()> {
//!     let server = SocketServer::bind(9000, EchoHandler).await?;
//!     server.start(false);
//!
//!     let client = SocketClient::new("127.0.0.1", 9000);
//!     client.start(false).await?.send_str("Hello");
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     assert_eq!(client.read_string(true)?, "Hello");
//!
//!     client.stop();
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! Logging goes through `tracing`; install a subscriber to see it. Lifecycle
//! chatter is emitted only for connections started with `debug = true`.

pub mod codec;
pub mod connection;
pub mod error;
pub mod reader;
pub mod server;
pub mod transport;

mod client;
mod writer;

pub use client::{ClientBuilder, SocketClient};
pub use connection::{Connection, ConnectionConfig, ConnectionState, ReceiveBuffer};
pub use error::{ConnectFailure, Result, SocketError};
pub use reader::FramedReader;
pub use server::{ConnectionHandler, SocketServer};
