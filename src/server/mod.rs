//! Server role: accept loop, connection registry and data handlers.
//!
//! - [`SocketServer`] - binds a listener, accepts and registers connections
//! - [`ConnectionRegistry`] - live connections by identifier
//! - [`ConnectionHandler`] - where server protocol logic plugs in
//! - [`EchoHandler`], [`DelimitedHandler`], [`DelimiterAccumulator`] - ready-made handlers

mod accept;
mod handler;
mod registry;

pub use accept::SocketServer;
pub use handler::{ConnectionHandler, DelimitedHandler, DelimiterAccumulator, EchoHandler};
pub use registry::ConnectionRegistry;
