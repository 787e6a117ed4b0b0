//! Socket client: one outbound connection plus read helpers.
//!
//! The [`ClientBuilder`] provides a fluent API for connect and read tuning.
//! The [`SocketClient`] wraps a single [`Connection`]:
//! 1. `start` connects and waits until ready (or fails)
//! 2. `send` queues bytes; writes happen in order on the writer task
//! 3. `read*` helpers pull from the receive buffer, waiting where bounded;
//!    bounded reads take `None` to use the client's read timeout
//! 4. `stop` (or drop) cancels the transport
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockwire::SocketClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SocketClient::builder("127.0.0.1", 9000)
//!         .connect_timeout(Duration::from_secs(2))
//!         .build();
//!
//!     client.start(false).await?.send_str("Hello Baby#With a Separator");
//!     let first = client.read_string_until("#", None).await?;
//!     assert_eq!(first, "Hello Baby");
//!
//!     client.stop();
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;
use crate::reader::{FramedReader, DEFAULT_READ_TIMEOUT};
use crate::transport::{ConnectOptions, TcpTransport, Transport};

/// Builder for configuring and creating a TCP [`SocketClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    options: ConnectOptions,
    config: ConnectionConfig,
    read_timeout: Duration,
    debug: bool,
}

impl ClientBuilder {
    /// Create a builder for `host:port` with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            options: ConnectOptions::default(),
            config: ConnectionConfig::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            debug: false,
        }
    }

    /// How long to keep retrying the TCP connect before the transport
    /// reports a timed-out waiting state.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Delay between connect attempts.
    ///
    /// Default: 250ms
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.options.retry_interval = interval;
        self
    }

    /// Set `TCP_NODELAY` on the socket.
    ///
    /// Default: true
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.options.nodelay = nodelay;
        self
    }

    /// Overall deadline for `start`. `None` leaves it to the transport.
    ///
    /// Default: 30 seconds
    pub fn start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    /// Interval between buffer checks during bounded reads.
    ///
    /// Default: 30ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Maximum bytes requested per receive.
    ///
    /// Default: 64KB
    pub fn max_receive_length(mut self, length: usize) -> Self {
        self.config.max_receive_length = length.max(1);
        self
    }

    /// Timeout for bounded reads called with `None`.
    ///
    /// Default: 10 seconds
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Log lifecycle events at debug level.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Build the client without connecting.
    pub fn build(self) -> SocketClient {
        let transport = TcpTransport::connect(self.host, self.port, self.options);
        let mut client = SocketClient::with_transport(transport, self.config);
        client.read_timeout = self.read_timeout;
        client.connection.set_debug(self.debug);
        client
    }

    /// Build the client and start it.
    pub async fn start(self) -> Result<SocketClient> {
        let debug = self.debug;
        let client = self.build();
        client.start(debug).await?;
        Ok(client)
    }
}

/// A client connection.
///
/// Dropping the client stops the connection.
pub struct SocketClient<T: Transport = TcpTransport> {
    connection: Arc<Connection<T>>,
    read_timeout: Duration,
}

impl<T: Transport> std::fmt::Debug for SocketClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl SocketClient<TcpTransport> {
    /// Client for `host:port` with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientBuilder::new(host, port).build()
    }

    /// Create a client builder.
    pub fn builder(host: impl Into<String>, port: u16) -> ClientBuilder {
        ClientBuilder::new(host, port)
    }
}

impl<T: Transport> SocketClient<T> {
    /// Client over an arbitrary transport.
    pub fn with_transport(transport: T, config: ConnectionConfig) -> Self {
        Self {
            connection: Connection::new(transport, config),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Timeout used by bounded reads called with `None`.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Connect and wait until ready. Returns `self` for chaining.
    pub async fn start(&self, debug: bool) -> Result<&Self> {
        if debug {
            self.connection.set_debug(true);
        }
        self.connection.set_on_stop(|error| match error {
            Some(e) => tracing::warn!(error = %e, "Client connection stopped"),
            None => tracing::debug!("Client connection closed"),
        });

        self.connection.start().await?;
        Ok(self)
    }

    /// Stop the connection.
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Queue bytes for sending.
    pub fn send(&self, data: impl Into<Bytes>) -> &Self {
        self.connection.send(data);
        self
    }

    /// Queue a UTF-8 string for sending.
    pub fn send_str(&self, text: &str) -> &Self {
        self.send(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Everything received so far, optionally clearing the buffer.
    pub fn read(&self, clear: bool) -> Result<Bytes> {
        Ok(self.reader()?.read(clear))
    }

    /// [`read`](Self::read) as UTF-8.
    pub fn read_string(&self, clear: bool) -> Result<String> {
        self.reader()?.read_string(clear)
    }

    /// Wait for `delimiter` and return the first frame.
    ///
    /// `timeout` accepts a `Duration` or `None` for the client's read timeout.
    pub async fn read_until(
        &self,
        delimiter: &[u8],
        timeout: impl Into<Option<Duration>>,
    ) -> Result<Bytes> {
        let timeout = self.timeout_or_default(timeout);
        self.reader()?.read_until(delimiter, timeout).await
    }

    /// [`read_until`](Self::read_until) as UTF-8.
    pub async fn read_string_until(
        &self,
        delimiter: &str,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<String> {
        let timeout = self.timeout_or_default(timeout);
        self.reader()?.read_string_until(delimiter, timeout).await
    }

    /// Wait until the buffer holds one complete JSON value.
    pub async fn read_json<D: DeserializeOwned>(
        &self,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<D> {
        let timeout = self.timeout_or_default(timeout);
        self.reader()?.read_json(timeout).await
    }

    /// Wait until the buffer decodes as `D` with codec `C`.
    pub async fn read_decoded<C: Codec, D: DeserializeOwned>(
        &self,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<D> {
        let timeout = self.timeout_or_default(timeout);
        self.reader()?.read_decoded::<C, D>(timeout).await
    }

    /// Discard everything buffered.
    pub fn clear_buffer(&self) {
        self.connection.clear_buffer();
    }

    /// Whether the connection is ready.
    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection<T>> {
        &self.connection
    }

    fn timeout_or_default(&self, timeout: impl Into<Option<Duration>>) -> Duration {
        timeout.into().unwrap_or(self.read_timeout)
    }

    fn reader(&self) -> Result<FramedReader<'_, T>> {
        FramedReader::new(&self.connection)
    }
}

impl<T: Transport> Drop for SocketClient<T> {
    fn drop(&mut self) {
        self.connection.clear_on_stop();
        self.connection.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT};
    use crate::error::SocketError;
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_INTERVAL};

    #[test]
    fn test_builder_defaults() {
        let builder = SocketClient::builder("localhost", 9000);
        assert_eq!(builder.host, "localhost");
        assert_eq!(builder.port, 9000);
        assert_eq!(builder.options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(builder.options.retry_interval, DEFAULT_RETRY_INTERVAL);
        assert_eq!(builder.config.start_timeout, Some(DEFAULT_START_TIMEOUT));
        assert_eq!(builder.config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(builder.read_timeout, DEFAULT_READ_TIMEOUT);
        assert!(!builder.debug);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = SocketClient::builder("10.0.0.1", 1)
            .connect_timeout(Duration::from_secs(2))
            .retry_interval(Duration::from_millis(100))
            .nodelay(false)
            .start_timeout(None)
            .poll_interval(Duration::from_millis(5))
            .max_receive_length(0)
            .read_timeout(Duration::from_millis(1500))
            .debug(true);

        assert_eq!(builder.options.connect_timeout, Duration::from_secs(2));
        assert_eq!(builder.options.retry_interval, Duration::from_millis(100));
        assert!(!builder.options.nodelay);
        assert_eq!(builder.config.start_timeout, None);
        assert_eq!(builder.config.poll_interval, Duration::from_millis(5));
        assert_eq!(builder.config.max_receive_length, 1);
        assert_eq!(builder.read_timeout, Duration::from_millis(1500));
        assert!(builder.debug);

        let client = builder.build();
        assert_eq!(client.read_timeout(), Duration::from_millis(1500));
    }

    fn scripted() -> SocketClient<ScriptedTransport> {
        SocketClient::with_transport(ScriptedTransport::ready(), ConnectionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_require_ready() {
        let client = scripted();
        assert!(matches!(client.read(false), Err(SocketError::ConnectionNotReady)));
        assert!(matches!(
            client.read_until(b"#", Duration::from_secs(1)).await,
            Err(SocketError::ConnectionNotReady)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_send_and_read() {
        let client = scripted();
        client.start(false).await.unwrap().send_str("Hello");
        assert!(client.is_ready());

        let transport = client.connection().transport();
        transport.push_data(b"world#rest");
        let frame = client
            .read_string_until("#", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(frame, "world");
        assert_eq!(client.read_string(true).unwrap(), "rest");

        while client.connection().pending_sends() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(&transport.sent()[0][..], b"Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_uses_default_read_timeout() {
        let client = scripted();
        client.start(false).await.unwrap();
        assert_eq!(client.read_timeout(), DEFAULT_READ_TIMEOUT);
        client.connection().transport().push_data(b"no separator");
        while client.connection().buffered_len() < 12 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let started = tokio::time::Instant::now();
        let err = client.read_until(b"#", None).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SocketError::Timeout(t) if t == DEFAULT_READ_TIMEOUT));
        assert!(elapsed >= DEFAULT_READ_TIMEOUT);
        assert!(elapsed < DEFAULT_READ_TIMEOUT + Duration::from_millis(100));
        assert_eq!(client.read_string(false).unwrap(), "no separator");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_buffer() {
        let client = scripted();
        client.start(false).await.unwrap();
        client.connection().transport().push_data(b"junk");
        while client.connection().buffered_len() < 4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        client.clear_buffer();
        assert!(client.read(false).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_drop_cancel_transport() {
        let client = scripted();
        client.start(false).await.unwrap();
        client.stop();
        assert!(!client.is_ready());

        let connection = client.connection().clone();
        drop(client);
        assert_eq!(connection.transport().cancel_count(), 1);
    }
}
