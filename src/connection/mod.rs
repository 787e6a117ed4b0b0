//! Connection module - lifecycle state machine and receive buffering.
//!
//! Provides:
//! - [`Connection`] - owns a transport, drives its state and receive loop
//! - [`ConnectionState`] - lifecycle states
//! - [`ReceiveBuffer`] - bytes accumulated by the receive loop
//! - [`ConnectionConfig`] - start deadline, poll interval, receive size

mod buffer;
mod lifecycle;
mod state;

pub use buffer::ReceiveBuffer;
pub use lifecycle::{
    Connection, ConnectionConfig, DataHandler, DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT,
    MAX_RECEIVE_LENGTH,
};
pub use state::ConnectionState;

pub(crate) use state::wait_terminal;
