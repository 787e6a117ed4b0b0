//! Raw, delimited and typed reads over a connection's receive buffer.
//!
//! Bounded reads poll the buffer: check, and if nothing is there yet, sleep
//! `poll_interval` and check again until `timeout` has elapsed. The sleep is
//! a `tokio::time::sleep`, so the connection's driver task keeps appending
//! while a reader waits. A timed-out read never consumes anything.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::codec::{Codec, JsonCodec};
use crate::connection::Connection;
use crate::error::{Result, SocketError};
use crate::transport::{TcpTransport, Transport};

/// Default timeout for bounded reads (10s).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Reader over a ready connection's receive buffer.
///
/// One reader per connection at a time; concurrent readers race for the
/// same bytes.
pub struct FramedReader<'a, T: Transport = TcpTransport> {
    connection: &'a Connection<T>,
    poll_interval: Duration,
}

impl<'a, T: Transport> FramedReader<'a, T> {
    /// Create a reader. Fails with [`SocketError::ConnectionNotReady`]
    /// unless the connection is ready.
    pub fn new(connection: &'a Connection<T>) -> Result<Self> {
        if !connection.is_ready() {
            return Err(SocketError::ConnectionNotReady);
        }
        Ok(Self {
            connection,
            poll_interval: connection.config().poll_interval,
        })
    }

    /// Override the interval between buffer checks.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Everything buffered so far, optionally clearing the buffer.
    pub fn read(&self, clear: bool) -> Bytes {
        let buffer = self.connection.buffer();
        if clear {
            buffer.take()
        } else {
            buffer.snapshot()
        }
    }

    /// [`read`](Self::read) as UTF-8.
    pub fn read_string(&self, clear: bool) -> Result<String> {
        Ok(String::from_utf8(self.read(clear).to_vec())?)
    }

    /// Wait for `delimiter` and return the first frame.
    ///
    /// Splitting follows [`split_frame`](super::split_frame): empty segments
    /// are skipped, and whatever follows the first frame stays buffered. An
    /// empty delimiter returns empty bytes without waiting.
    pub async fn read_until(&self, delimiter: &[u8], timeout: Duration) -> Result<Bytes> {
        if delimiter.is_empty() {
            return Ok(Bytes::new());
        }
        let buffer = self.connection.buffer();
        self.poll(timeout, || buffer.split_frame(delimiter)).await
    }

    /// [`read_until`](Self::read_until) as UTF-8.
    pub async fn read_string_until(&self, delimiter: &str, timeout: Duration) -> Result<String> {
        let frame = self.read_until(delimiter.as_bytes(), timeout).await?;
        Ok(String::from_utf8(frame.to_vec())?)
    }

    /// Wait until the whole buffer decodes as `D` with codec `C`.
    ///
    /// A decode failure means the value has not fully arrived yet; only the
    /// timeout ends the wait. On success the buffer is cleared.
    pub async fn read_decoded<C: Codec, D: DeserializeOwned>(&self, timeout: Duration) -> Result<D> {
        let buffer = self.connection.buffer();
        let result = self
            .poll(timeout, || buffer.decode_with(|bytes| C::decode(bytes).ok()))
            .await;

        if result.is_err() && self.connection.is_debug() {
            tracing::debug!(
                codec = C::NAME,
                buffered = buffer.len(),
                "Typed read timed out without a complete value"
            );
        }
        result
    }

    /// [`read_decoded`](Self::read_decoded) with [`JsonCodec`].
    pub async fn read_json<D: DeserializeOwned>(&self, timeout: Duration) -> Result<D> {
        self.read_decoded::<JsonCodec, D>(timeout).await
    }

    async fn poll<R>(&self, timeout: Duration, mut attempt: impl FnMut() -> Option<R>) -> Result<R> {
        let start = Instant::now();

        loop {
            if let Some(value) = attempt() {
                return Ok(value);
            }

            if start.elapsed() > timeout {
                return Err(SocketError::Timeout(timeout));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
