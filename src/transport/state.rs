//! Transport-level states, errors and receive completions.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;

/// State notifications published by a [`Transport`](super::Transport).
#[derive(Debug, Clone)]
pub enum TransportState {
    /// The transport is establishing the connection.
    Preparing,
    /// Bytes can flow in both directions.
    Ready,
    /// Not usable right now; the transport may still recover.
    Waiting(TransportError),
    /// Terminal failure.
    Failed(TransportError),
    /// The transport was cancelled.
    Cancelled,
}

impl TransportState {
    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            TransportState::Preparing => "preparing",
            TransportState::Ready => "ready",
            TransportState::Waiting(_) => "waiting",
            TransportState::Failed(_) => "failed",
            TransportState::Cancelled => "cancelled",
        }
    }
}

/// A transport error.
///
/// Wraps `std::io::Error` behind an `Arc` so it can travel through state
/// channels and be handed to several observers.
#[derive(Debug, Clone)]
pub struct TransportError(Arc<io::Error>);

impl TransportError {
    /// Wrap an I/O error.
    pub fn new(error: io::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Build an error with the given kind and message.
    pub fn other(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::new(io::Error::new(kind, message.into()))
    }

    /// A "connection timed out" error.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::other(io::ErrorKind::TimedOut, message)
    }

    /// The error used when the transport has no live socket.
    pub fn not_connected() -> Self {
        Self::other(io::ErrorKind::NotConnected, "transport is not connected")
    }

    /// The I/O error kind.
    #[inline]
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }

    /// Whether this is the OS-level "connection timed out" condition.
    ///
    /// The standard library decodes `ETIMEDOUT` (and `WSAETIMEDOUT`) to
    /// [`io::ErrorKind::TimedOut`].
    pub fn is_timeout(&self) -> bool {
        self.kind() == io::ErrorKind::TimedOut
    }

    /// The wrapped I/O error.
    pub fn io_error(&self) -> &io::Error {
        &self.0
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        Self::new(error)
    }
}

/// Completion of a single transport receive request.
#[derive(Debug, Clone, Default)]
pub struct Received {
    /// Bytes read, if any.
    pub data: Option<Bytes>,
    /// The remote end closed the stream.
    pub is_complete: bool,
    /// The read failed.
    pub error: Option<TransportError>,
}

impl Received {
    /// A completion carrying data.
    pub fn data(data: Bytes) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Remote end of stream.
    pub fn end() -> Self {
        Self {
            is_complete: true,
            ..Self::default()
        }
    }

    /// A failed read.
    pub fn error(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(TransportError::timed_out("slow").is_timeout());
        assert!(TransportError::from(io::Error::from(io::ErrorKind::TimedOut)).is_timeout());
        assert!(!TransportError::other(io::ErrorKind::ConnectionRefused, "refused").is_timeout());
        assert!(!TransportError::not_connected().is_timeout());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_etimedout_errno_is_timeout() {
        // ETIMEDOUT on Linux
        let err = TransportError::from(io::Error::from_raw_os_error(110));
        assert!(err.is_timeout());
        assert_eq!(err.io_error().raw_os_error(), Some(110));
    }

    #[test]
    fn test_error_is_cheap_to_clone() {
        let err = TransportError::other(io::ErrorKind::BrokenPipe, "pipe");
        let copy = err.clone();
        assert!(std::ptr::eq(err.io_error(), copy.io_error()));
        assert_eq!(copy.to_string(), "pipe");
    }

    #[test]
    fn test_received_constructors() {
        let r = Received::data(Bytes::from_static(b"hi"));
        assert_eq!(r.data.as_deref(), Some(&b"hi"[..]));
        assert!(!r.is_complete);
        assert!(r.error.is_none());

        assert!(Received::end().is_complete);
        assert!(Received::error(TransportError::not_connected()).error.is_some());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TransportState::Preparing.name(), "preparing");
        assert_eq!(
            TransportState::Waiting(TransportError::not_connected()).name(),
            "waiting"
        );
        assert_eq!(TransportState::Cancelled.name(), "cancelled");
    }
}
