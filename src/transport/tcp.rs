//! TCP transport built on tokio sockets.
//!
//! - [`TcpTransport`]: outbound (connect) or accepted stream
//! - [`TcpListenerTransport`]: listening socket for the server role
//!
//! An outbound transport keeps retrying while the peer refuses the
//! connection, publishing `Waiting` for every failed attempt. Once the
//! connect timeout elapses it publishes `Waiting` with a timed-out error,
//! which is how callers learn that the peer never showed up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{wait_cancelled, Listener, Received, Transport, TransportError, TransportState};

/// Default time allowed for an outbound connection to become ready.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between connection attempts while the peer refuses.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Options for outbound and accepted TCP transports.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Overall budget for reaching the ready state.
    pub connect_timeout: Duration,
    /// Delay between attempts while the peer refuses.
    pub retry_interval: Duration,
    /// Set `TCP_NODELAY` on the socket.
    pub nodelay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            nodelay: true,
        }
    }
}

/// Where the socket comes from.
enum Origin {
    Remote { host: String, port: u16 },
    Accepted(Mutex<Option<TcpStream>>),
}

/// State shared with the connect task.
///
/// Socket halves sit in their slots only while idle. An operation leases its
/// half out of the slot; the `*_turn` locks serialize operations of one kind.
struct Shared {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    read_turn: AsyncMutex<()>,
    write_turn: AsyncMutex<()>,
    events: Mutex<Option<UnboundedSender<TransportState>>>,
    cancelled: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            read_turn: AsyncMutex::new(()),
            write_turn: AsyncMutex::new(()),
            events: Mutex::new(None),
            cancelled: watch::Sender::new(false),
        }
    }

    fn publish(&self, state: TransportState) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(state);
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Store the socket halves and announce readiness.
    fn install(&self, stream: TcpStream, nodelay: bool) {
        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY: {}", e);
            }
        }
        let (read_half, write_half) = stream.into_split();
        {
            let mut reader = self.reader.lock();
            let mut writer = self.writer.lock();
            if self.is_cancelled() {
                return;
            }
            *reader = Some(read_half);
            *writer = Some(write_half);
        }
        self.publish(TransportState::Ready);
    }

    /// Drop both halves, closing the socket.
    fn release(&self) {
        self.writer.lock().take();
        self.reader.lock().take();
    }
}

/// A socket half taken out of its slot for one operation.
///
/// On drop the half goes back to the slot, unless the transport was
/// cancelled meanwhile, in which case it is dropped. The cancelled flag is
/// checked under the slot lock, and `cancel` sets the flag before locking,
/// so a cancel racing with the return cannot leave the half behind.
struct Lease<'a, H> {
    slot: &'a Mutex<Option<H>>,
    cancelled: &'a watch::Sender<bool>,
    half: Option<H>,
}

impl<'a, H> Lease<'a, H> {
    /// Take the half out of `slot`. `half` is `None` if the slot was empty.
    fn take(slot: &'a Mutex<Option<H>>, cancelled: &'a watch::Sender<bool>) -> Self {
        let half = slot.lock().take();
        Self {
            slot,
            cancelled,
            half,
        }
    }
}

impl<H> Drop for Lease<'_, H> {
    fn drop(&mut self) {
        if let Some(half) = self.half.take() {
            let mut slot = self.slot.lock();
            if !*self.cancelled.borrow() {
                *slot = Some(half);
            }
        }
    }
}

/// Connect errors worth another attempt.
fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
    )
}

/// Outbound connect loop. Publishes every state change through `shared`.
async fn connect_loop(shared: Arc<Shared>, host: String, port: u16, options: ConnectOptions) {
    let deadline = Instant::now() + options.connect_timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            shared.publish(TransportState::Waiting(TransportError::timed_out(format!(
                "connect to {}:{} timed out after {:?}",
                host, port, options.connect_timeout
            ))));
            return;
        }

        match tokio::time::timeout(remaining, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(stream)) => {
                shared.install(stream, options.nodelay);
                return;
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut || is_retryable(&e) => {
                let timed_out = e.kind() == io::ErrorKind::TimedOut;
                shared.publish(TransportState::Waiting(e.into()));
                if timed_out {
                    return;
                }
                let pause = options
                    .retry_interval
                    .min(deadline.saturating_duration_since(Instant::now()));
                tokio::time::sleep(pause).await;
            }
            Ok(Err(e)) => {
                shared.publish(TransportState::Failed(e.into()));
                return;
            }
            Err(_) => {
                // Loop around to publish the timed-out waiting state.
            }
        }
    }
}

/// A TCP byte stream.
pub struct TcpTransport {
    origin: Origin,
    options: ConnectOptions,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Prepare an outbound connection. No I/O happens until `start`.
    pub fn connect(host: impl Into<String>, port: u16, options: ConnectOptions) -> Self {
        Self {
            origin: Origin::Remote {
                host: host.into(),
                port,
            },
            options,
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
        }
    }

    /// Wrap a stream accepted by a listener.
    pub fn accepted(stream: TcpStream, options: ConnectOptions) -> Self {
        Self {
            origin: Origin::Accepted(Mutex::new(Some(stream))),
            options,
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
        }
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl Transport for TcpTransport {
    fn start(&self) -> UnboundedReceiver<TransportState> {
        let (tx, rx) = mpsc::unbounded_channel();

        if self.shared.is_cancelled() {
            let _ = tx.send(TransportState::Cancelled);
            return rx;
        }

        let _ = tx.send(TransportState::Preparing);
        *self.shared.events.lock() = Some(tx);

        let shared = self.shared.clone();
        let task = match &self.origin {
            Origin::Remote { host, port } => tokio::spawn(connect_loop(
                shared,
                host.clone(),
                *port,
                self.options.clone(),
            )),
            Origin::Accepted(stream) => {
                let stream = stream.lock().take();
                let nodelay = self.options.nodelay;
                tokio::spawn(async move {
                    match stream {
                        Some(stream) => shared.install(stream, nodelay),
                        None => shared.publish(TransportState::Failed(
                            TransportError::not_connected(),
                        )),
                    }
                })
            }
        };
        *self.task.lock() = Some(task);

        rx
    }

    fn cancel(&self) {
        if self.shared.cancelled.send_replace(true) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(tx) = self.shared.events.lock().take() {
            let _ = tx.send(TransportState::Cancelled);
        }
        // Leased halves are dropped when their lease ends.
        self.shared.release();
    }

    fn receive(
        &self,
        min_bytes: usize,
        max_bytes: usize,
    ) -> impl std::future::Future<Output = Received> + Send + '_ {
        async move {
            let mut cancelled = self.shared.cancelled.subscribe();
            let _turn = self.shared.read_turn.lock().await;
            let mut lease = Lease::take(&self.shared.reader, &self.shared.cancelled);
            let Some(reader) = lease.half.as_mut() else {
                return Received::end();
            };

            let max_bytes = max_bytes.max(1);
            let min_bytes = min_bytes.clamp(1, max_bytes);
            let mut buf = BytesMut::with_capacity(max_bytes);

            loop {
                if buf.len() >= min_bytes {
                    break Received::data(buf.split().freeze());
                }
                let mut limited = (&mut *reader).take((max_bytes - buf.len()) as u64);
                tokio::select! {
                    res = limited.read_buf(&mut buf) => match res {
                        Ok(0) => {
                            break Received {
                                data: (!buf.is_empty()).then(|| buf.split().freeze()),
                                is_complete: true,
                                error: None,
                            };
                        }
                        Ok(_) => {}
                        Err(e) => {
                            break Received {
                                data: (!buf.is_empty()).then(|| buf.split().freeze()),
                                is_complete: false,
                                error: Some(e.into()),
                            };
                        }
                    },
                    _ = wait_cancelled(&mut cancelled) => break Received::end(),
                }
            }
        }
    }

    fn send(
        &self,
        data: Bytes,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send + '_ {
        async move {
            let mut cancelled = self.shared.cancelled.subscribe();
            let _turn = self.shared.write_turn.lock().await;
            let mut lease = Lease::take(&self.shared.writer, &self.shared.cancelled);
            let Some(writer) = lease.half.as_mut() else {
                return Err(TransportError::not_connected());
            };

            tokio::select! {
                res = async {
                    writer.write_all(&data).await?;
                    writer.flush().await
                } => res.map_err(TransportError::from),
                _ = wait_cancelled(&mut cancelled) => Err(TransportError::not_connected()),
            }
        }
    }
}

/// A listening TCP socket.
pub struct TcpListenerTransport {
    listener: TcpListener,
    options: ConnectOptions,
    cancelled: watch::Sender<bool>,
}

impl TcpListenerTransport {
    /// Bind on all interfaces. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> io::Result<Self> {
        Self::bind_addr(("0.0.0.0", port)).await
    }

    /// Bind to a specific address.
    pub async fn bind_addr(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            options: ConnectOptions::default(),
            cancelled: watch::Sender::new(false),
        })
    }

    /// Options applied to accepted transports.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }
}

impl Listener for TcpListenerTransport {
    type Transport = TcpTransport;

    fn accept(
        &self,
    ) -> impl std::future::Future<Output = Result<TcpTransport, TransportError>> + Send + '_ {
        async move {
            let mut cancelled = self.cancelled.subscribe();
            tokio::select! {
                res = self.listener.accept() => {
                    let (stream, _addr) = res?;
                    Ok(TcpTransport::accepted(stream, self.options.clone()))
                }
                _ = wait_cancelled(&mut cancelled) => Err(TransportError::other(
                    io::ErrorKind::ConnectionAborted,
                    "listener cancelled",
                )),
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_state(rx: &mut UnboundedReceiver<TransportState>) -> TransportState {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("state in time")
            .expect("channel open")
    }

    #[test]
    fn test_connect_options_default() {
        let options = ConnectOptions::default();
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.retry_interval, DEFAULT_RETRY_INTERVAL);
        assert!(options.nodelay);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(is_retryable(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn test_connect_send_receive() {
        let listener = TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpTransport::connect("127.0.0.1", port, ConnectOptions::default());
        let mut states = client.start();
        assert!(matches!(next_state(&mut states).await, TransportState::Preparing));

        let server = listener.accept().await.unwrap();
        let mut server_states = server.start();
        assert!(matches!(next_state(&mut server_states).await, TransportState::Preparing));
        assert!(matches!(next_state(&mut server_states).await, TransportState::Ready));
        assert!(matches!(next_state(&mut states).await, TransportState::Ready));

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        let received = server.receive(4, 1024).await;
        assert_eq!(received.data.as_deref(), Some(&b"ping"[..]));
        assert!(!received.is_complete);
    }

    #[tokio::test]
    async fn test_remote_close_reports_end() {
        let listener = TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpTransport::connect("127.0.0.1", port, ConnectOptions::default());
        let mut states = client.start();
        let server = listener.accept().await.unwrap();
        let _server_states = server.start();

        while !matches!(next_state(&mut states).await, TransportState::Ready) {}

        server.cancel();
        let received = client.receive(1, 1024).await;
        assert!(received.is_complete);
        assert!(received.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_receive() {
        let listener = TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = Arc::new(TcpTransport::connect(
            "127.0.0.1",
            port,
            ConnectOptions::default(),
        ));
        let mut states = client.start();
        let _server = listener.accept().await.unwrap();
        while !matches!(next_state(&mut states).await, TransportState::Ready) {}

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.receive(1, 1024).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.cancel();

        let received = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_complete);
        assert!(matches!(next_state(&mut states).await, TransportState::Cancelled));
        assert!(client.is_cancelled());
    }

    /// A started client transport and the (unstarted) accepted peer.
    async fn connected() -> (TcpTransport, TcpTransport) {
        let listener = TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpTransport::connect("127.0.0.1", port, ConnectOptions::default());
        let mut states = client.start();
        let server = listener.accept().await.unwrap();
        while !matches!(next_state(&mut states).await, TransportState::Ready) {}
        (client, server)
    }

    #[tokio::test]
    async fn test_dropped_receive_returns_read_half() {
        let (client, _server) = connected().await;
        {
            let pending = client.receive(1, 1024);
            tokio::pin!(pending);
            tokio::select! {
                _ = &mut pending => panic!("nothing was sent"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            assert!(client.shared.reader.lock().is_none());
        }
        assert!(client.shared.reader.lock().is_some());
    }

    #[tokio::test]
    async fn test_cancel_releases_leased_read_half() {
        let (client, _server) = connected().await;
        {
            let pending = client.receive(1, 1024);
            tokio::pin!(pending);
            tokio::select! {
                _ = &mut pending => panic!("nothing was sent"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            // Dropped without ever observing the cancellation.
            client.cancel();
        }

        assert!(client.shared.reader.lock().is_none());
        assert!(client.shared.writer.lock().is_none());
        assert!(client.receive(1, 1024).await.is_complete);
        assert!(client.send(Bytes::from_static(b"late")).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_stop_releases_socket() {
        use crate::connection::{Connection, ConnectionConfig};

        let listener = TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        for _ in 0..20 {
            let transport = TcpTransport::connect("127.0.0.1", port, ConnectOptions::default());
            let conn = Connection::new(transport, ConnectionConfig::default());
            let (started, accepted) = tokio::join!(conn.start(), listener.accept());
            started.unwrap();
            let _peer = accepted.unwrap();

            conn.stop();

            // The driver and writer tasks hold the other references.
            let deadline = Instant::now() + Duration::from_secs(2);
            while Arc::strong_count(&conn) > 1 {
                assert!(Instant::now() < deadline, "connection tasks still running");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert!(conn.transport().shared.reader.lock().is_none());
            assert!(conn.transport().shared.writer.lock().is_none());
        }
    }

    #[tokio::test]
    async fn test_refused_connection_waits_then_times_out() {
        // Reserve a port, then free it so nothing listens there.
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let options = ConnectOptions {
            connect_timeout: Duration::from_millis(300),
            retry_interval: Duration::from_millis(50),
            nodelay: true,
        };
        let client = TcpTransport::connect("127.0.0.1", port, options);
        let mut states = client.start();
        assert!(matches!(next_state(&mut states).await, TransportState::Preparing));

        let mut saw_timeout = false;
        while let Ok(Some(state)) =
            tokio::time::timeout(Duration::from_secs(3), states.recv()).await
        {
            match state {
                TransportState::Waiting(e) if e.is_timeout() => {
                    saw_timeout = true;
                    break;
                }
                TransportState::Waiting(_) => {}
                other => panic!("unexpected state {}", other.name()),
            }
        }
        assert!(saw_timeout);
    }

    #[tokio::test]
    async fn test_listener_cancel_aborts_accept() {
        let listener = Arc::new(TcpListenerTransport::bind_addr("127.0.0.1:0").await.unwrap());
        let pending = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.accept().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        assert!(listener.is_cancelled());
    }
}
