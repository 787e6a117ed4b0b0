//! Connection lifecycle: start, receive loop, send, stop.
//!
//! Each started connection runs one driver task. The driver is the
//! connection's serialized event context: it alone consumes transport state
//! notifications and receive completions, so it is the only writer of the
//! receive buffer. Callers may `send`, `stop` and read from any task.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::connection::{Connection, ConnectionConfig};
//! use sockwire::transport::{ConnectOptions, TcpTransport};
//!
//! let transport = TcpTransport::connect("127.0.0.1", 8080, ConnectOptions::default());
//! let connection = Connection::new(transport, ConnectionConfig::default());
//! connection.set_on_stop(|error| println!("stopped: {:?}", error));
//! connection.start().await?;
//! connection.send(&b"ping"[..]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};

use super::state::{wait_terminal, ConnectionState};
use super::ReceiveBuffer;
use crate::error::{ConnectFailure, Result, SocketError};
use crate::transport::{Received, TcpTransport, Transport, TransportError, TransportState};
use crate::writer::{spawn_writer_task, SendQueue};

/// Default deadline for `start` to reach the ready state.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between buffer checks during bounded reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Largest single receive request (64KB).
pub const MAX_RECEIVE_LENGTH: usize = 65536;

/// Handler invoked with every received payload instead of buffering it.
pub type DataHandler<T> = Arc<dyn Fn(Bytes, &Arc<Connection<T>>) + Send + Sync>;

type StopNotification = Box<dyn FnOnce(Option<TransportError>) + Send>;
type StartResolver = oneshot::Sender<std::result::Result<(), ConnectFailure>>;

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on `start`. `None` relies on the transport alone.
    pub start_timeout: Option<Duration>,
    /// Interval between buffer checks during bounded reads.
    pub poll_interval: Duration,
    /// Maximum bytes requested per receive.
    pub max_receive_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            start_timeout: Some(DEFAULT_START_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_receive_length: MAX_RECEIVE_LENGTH,
        }
    }
}

/// Log line prefix identifying a connection.
struct Label(Option<u64>);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => f.write_str("client"),
        }
    }
}

/// Lifecycle chatter, only emitted when the connection's debug flag is set.
macro_rules! debug_log {
    ($conn:expr, $($arg:tt)+) => {
        if $conn.is_debug() {
            tracing::debug!(connection = %$conn.label(), $($arg)+);
        }
    };
}

/// One byte-stream connection.
///
/// Always handled through an `Arc`; [`start`](Connection::start) spawns a
/// driver task that keeps its own reference until the connection stops.
pub struct Connection<T: Transport = TcpTransport> {
    id: Option<u64>,
    transport: T,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    buffer: ReceiveBuffer,
    queue: SendQueue,
    debug: AtomicBool,
    cancelled: AtomicBool,
    on_stop: Mutex<Option<StopNotification>>,
    on_data: Mutex<Option<DataHandler<T>>>,
    resolver: Mutex<Option<StartResolver>>,
}

impl<T: Transport> Connection<T> {
    /// Create a client-side connection.
    pub fn new(transport: T, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self::build(None, transport, config))
    }

    /// Create a server-side connection with an assigned identifier.
    pub fn with_id(transport: T, id: u64, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self::build(Some(id), transport, config))
    }

    fn build(id: Option<u64>, transport: T, config: ConnectionConfig) -> Self {
        Self {
            id,
            transport,
            config,
            state: watch::Sender::new(ConnectionState::Idle),
            buffer: ReceiveBuffer::new(),
            queue: SendQueue::new(),
            debug: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            on_stop: Mutex::new(None),
            on_data: Mutex::new(None),
            resolver: Mutex::new(None),
        }
    }

    /// Server-assigned identifier; `None` for client connections.
    #[inline]
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// The underlying transport.
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The connection's configuration.
    #[inline]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Whether the connection is ready.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The receive buffer.
    #[inline]
    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    /// Number of buffered, unread bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard everything in the receive buffer.
    pub fn clear_buffer(&self) {
        self.buffer.clear();
    }

    /// Payloads queued for sending but not yet written.
    pub fn pending_sends(&self) -> usize {
        self.queue.pending_count()
    }

    /// Enable or disable lifecycle debug logging.
    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    /// Whether lifecycle debug logging is enabled.
    #[inline]
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    fn label(&self) -> Label {
        Label(self.id)
    }

    /// Set the stop notification, replacing any previous one.
    ///
    /// It is invoked at most once, with the terminal error or `None` for a
    /// clean close.
    pub fn set_on_stop(&self, notify: impl FnOnce(Option<TransportError>) + Send + 'static) {
        *self.on_stop.lock() = Some(Box::new(notify));
    }

    /// Remove the stop notification. Returns whether one was set.
    pub fn clear_on_stop(&self) -> bool {
        self.on_stop.lock().take().is_some()
    }

    /// Route received payloads to `handler` instead of the receive buffer.
    pub fn set_data_handler(
        &self,
        handler: impl Fn(Bytes, &Arc<Connection<T>>) + Send + Sync + 'static,
    ) {
        *self.on_data.lock() = Some(Arc::new(handler));
    }

    pub(crate) fn send_queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Start the connection and wait until it is ready.
    ///
    /// Returns immediately if already ready. Fails with
    /// [`SocketError::Connection`] if the transport is cancelled, fails,
    /// reports a timed-out waiting state, or the start deadline elapses.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let pending = {
            let current = self.state();
            if current.is_ready() {
                return Ok(());
            }
            if current.is_terminal() {
                return Err(ConnectFailure::Terminal.into());
            }
            if self.claim_start() {
                Some(self.launch())
            } else {
                None
            }
        };

        match pending {
            Some(rx) => self.await_start(rx).await,
            None => self.await_ready().await,
        }
    }

    /// Move `Idle` to `Preparing`. Only one caller wins.
    fn claim_start(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Idle) {
                *state = ConnectionState::Preparing;
                true
            } else {
                false
            }
        })
    }

    fn launch(self: &Arc<Self>) -> oneshot::Receiver<std::result::Result<(), ConnectFailure>> {
        debug_log!(self, "Connection will start");

        let (tx, rx) = oneshot::channel();
        *self.resolver.lock() = Some(tx);

        let events = self.transport.start();
        tokio::spawn(self.clone().drive(events));
        rx
    }

    async fn await_start(
        &self,
        rx: oneshot::Receiver<std::result::Result<(), ConnectFailure>>,
    ) -> Result<()> {
        let outcome = async move { rx.await.unwrap_or(Err(ConnectFailure::Cancelled)) };

        let result = match self.config.start_timeout {
            Some(limit) => match tokio::time::timeout(limit, outcome).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        connection = %self.label(),
                        "Connection not ready within {:?}",
                        limit
                    );
                    self.stop_with(Some(TransportError::timed_out(format!(
                        "not ready within {:?}",
                        limit
                    ))));
                    Err(ConnectFailure::Deadline(limit))
                }
            },
            None => outcome.await,
        };

        result.map_err(SocketError::from)
    }

    /// Wait for a start issued by someone else.
    async fn await_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_ready() {
                    return Ok(());
                }
                if state.is_terminal() {
                    return Err(ConnectFailure::Terminal.into());
                }
            }
            if rx.changed().await.is_err() {
                return Err(ConnectFailure::Terminal.into());
            }
        }
    }

    fn resolve(&self, outcome: std::result::Result<(), ConnectFailure>) {
        let resolver = self.resolver.lock().take();
        if let Some(tx) = resolver {
            let _ = tx.send(outcome);
        }
    }

    /// Apply a transport-driven transition. Returns whether it was legal.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(&next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// The driver task: startup observer, then steady-state loop.
    async fn drive(self: Arc<Self>, mut events: UnboundedReceiver<TransportState>) {
        let mut state_rx = self.state.subscribe();

        loop {
            let event = tokio::select! {
                biased;
                _ = wait_terminal(&mut state_rx) => {
                    self.resolve(Err(ConnectFailure::Cancelled));
                    return;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                self.stop_with(None);
                self.resolve(Err(ConnectFailure::Cancelled));
                return;
            };
            debug_log!(self, state = event.name(), "Transport state changed");

            match event {
                TransportState::Preparing => {}
                TransportState::Ready => {
                    if !self.transition(ConnectionState::Ready) {
                        self.resolve(Err(ConnectFailure::Cancelled));
                        return;
                    }
                    break;
                }
                TransportState::Waiting(e) if e.is_timeout() => {
                    self.abort_start(ConnectFailure::TimedOut(e.clone()), Some(e));
                    return;
                }
                TransportState::Waiting(e) => {
                    debug_log!(self, error = %e, "Connection waiting");
                    self.transition(ConnectionState::Waiting(e));
                }
                TransportState::Failed(e) => {
                    self.abort_start(ConnectFailure::Failed(e.clone()), Some(e));
                    return;
                }
                TransportState::Cancelled => {
                    self.abort_start(ConnectFailure::Cancelled, None);
                    return;
                }
            }
        }

        debug_log!(self, "Connection ready");
        spawn_writer_task(&self);
        self.resolve(Ok(()));
        self.run(events, state_rx).await;
    }

    fn abort_start(&self, failure: ConnectFailure, error: Option<TransportError>) {
        tracing::warn!(connection = %self.label(), "Connection failed to start: {}", failure);
        self.stop_with(error);
        self.resolve(Err(failure));
    }

    /// Receive loop plus steady-state observer. Returns once stopped.
    async fn run(
        self: &Arc<Self>,
        mut events: UnboundedReceiver<TransportState>,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) {
        let max = self.config.max_receive_length;
        let receive = self.transport.receive(1, max);
        tokio::pin!(receive);

        loop {
            tokio::select! {
                received = &mut receive => {
                    if !self.on_received(received) {
                        return;
                    }
                    receive.set(self.transport.receive(1, max));
                }
                event = events.recv() => {
                    if !self.on_steady_event(event) {
                        return;
                    }
                }
                _ = wait_terminal(&mut state_rx) => return,
            }
        }
    }

    /// Handle one receive completion. Returns whether to keep receiving.
    fn on_received(self: &Arc<Self>, received: Received) -> bool {
        if let Some(data) = received.data.filter(|d| !d.is_empty()) {
            debug_log!(
                self,
                bytes = data.len(),
                text = %String::from_utf8_lossy(&data),
                "Connection did receive"
            );
            self.deliver(data);
        }

        if received.is_complete {
            debug_log!(self, "Connection did end");
            self.stop_with(None);
            return false;
        }
        if let Some(e) = received.error {
            self.fail(e);
            return false;
        }
        true
    }

    fn deliver(self: &Arc<Self>, data: Bytes) {
        let handler = self.on_data.lock().clone();
        match handler {
            Some(handler) => handler(data, self),
            None => self.buffer.append(&data),
        }
    }

    /// Steady-state observer. Returns whether to keep running.
    fn on_steady_event(&self, event: Option<TransportState>) -> bool {
        match event {
            Some(TransportState::Waiting(e)) | Some(TransportState::Failed(e)) => {
                self.fail(e);
                false
            }
            Some(TransportState::Cancelled) | None => {
                self.stop_with(None);
                false
            }
            Some(other) => {
                debug_log!(self, state = other.name(), "Transport state changed");
                true
            }
        }
    }

    /// Queue bytes for sending. Fire-and-forget; returns `self` for chaining.
    ///
    /// A write failure stops the connection with that error.
    pub fn send(&self, data: impl Into<Bytes>) -> &Self {
        let data = data.into();
        if data.is_empty() {
            return self;
        }
        let len = data.len();
        if self.state.borrow().is_terminal() || !self.queue.push(data) {
            debug_log!(self, bytes = len, "Dropping send on stopped connection");
        }
        self
    }

    pub(crate) fn log_sent(&self, len: usize) {
        debug_log!(self, bytes = len, "Connection did send");
    }

    /// Stop the connection without error.
    pub fn stop(&self) {
        debug_log!(self, "Connection will stop");
        self.stop_with(None);
    }

    /// Stop the connection because of a transport error.
    pub(crate) fn fail(&self, error: TransportError) {
        tracing::warn!(connection = %self.label(), error = %error, "Connection did fail");
        self.stop_with(Some(error));
    }

    /// Enter a terminal state, cancel the transport once, fire the stop
    /// notification if still present.
    fn stop_with(&self, error: Option<TransportError>) {
        let next = match &error {
            Some(e) => ConnectionState::Failed(e.clone()),
            None => ConnectionState::Cancelled,
        };
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = next;
                true
            }
        });

        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.transport.cancel();
        }

        let notify = self.on_stop.lock().take();
        if let Some(notify) = notify {
            notify(error);
        }
    }
}
