//! Error types for sockwire.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The connection could not be started.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectFailure),

    /// A bounded read exceeded its deadline.
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    /// A read was attempted while the connection is not ready.
    #[error("Connection not ready")]
    ConnectionNotReady,

    /// I/O error while binding or accepting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer contents are not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Why a connection failed to reach the ready state.
#[derive(Debug, Clone, Error)]
pub enum ConnectFailure {
    /// The transport was cancelled before it became ready.
    #[error("transport cancelled")]
    Cancelled,

    /// The transport reported a terminal failure.
    #[error("transport failed: {0}")]
    Failed(TransportError),

    /// The transport was waiting and the OS reported a connection timeout.
    #[error("connection timed out: {0}")]
    TimedOut(TransportError),

    /// The configured start deadline elapsed first.
    #[error("not ready within {0:?}")]
    Deadline(Duration),

    /// The connection already stopped and cannot be restarted.
    #[error("connection already stopped")]
    Terminal,
}

/// Result type alias using SocketError.
pub type Result<T> = std::result::Result<T, SocketError>;
