//! Transport module - the byte-stream primitive underneath a connection.
//!
//! The connection layer only talks to the [`Transport`] and [`Listener`]
//! traits. [`TcpTransport`] and [`TcpListenerTransport`] implement them over
//! tokio TCP sockets.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::transport::{ConnectOptions, TcpTransport, Transport, TransportState};
//!
//! let transport = TcpTransport::connect("127.0.0.1", 8080, ConnectOptions::default());
//! let mut states = transport.start();
//! while let Some(state) = states.recv().await {
//!     if matches!(state, TransportState::Ready) {
//!         break;
//!     }
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

mod state;
mod tcp;

pub use state::{Received, TransportError, TransportState};
pub use tcp::{
    ConnectOptions, TcpListenerTransport, TcpTransport, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_RETRY_INTERVAL,
};

/// A full-duplex byte stream.
///
/// Implementations must allow `receive` and `send` to be in flight at the
/// same time, and must make `cancel` idempotent.
pub trait Transport: Send + Sync + 'static {
    /// Start the transport.
    ///
    /// State changes are delivered in order on the returned channel.
    fn start(&self) -> UnboundedReceiver<TransportState>;

    /// Cancel the transport, aborting any in-flight connect or receive.
    fn cancel(&self);

    /// Wait for between `min_bytes` and `max_bytes` bytes.
    fn receive(
        &self,
        min_bytes: usize,
        max_bytes: usize,
    ) -> impl Future<Output = Received> + Send + '_;

    /// Write `data` and report completion.
    fn send(&self, data: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send + '_;
}

/// A listening endpoint producing connected transports.
pub trait Listener: Send + Sync + 'static {
    /// The transport type produced for each accepted peer.
    type Transport: Transport;

    /// Wait for the next inbound connection.
    fn accept(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send + '_;

    /// Address the listener is bound to.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stop accepting; pending `accept` calls fail.
    fn cancel(&self);

    /// Whether [`cancel`](Listener::cancel) has been called.
    fn is_cancelled(&self) -> bool;
}

/// Resolves once `cancelled` flips to true.
pub(crate) async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    loop {
        if *cancelled.borrow_and_update() {
            return;
        }
        if cancelled.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod scripted;
