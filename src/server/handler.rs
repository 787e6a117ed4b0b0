//! Server-side data handlers.
//!
//! Every payload a server connection receives goes to the server's single
//! [`ConnectionHandler`] together with the connection it arrived on, so the
//! handler can answer on the same connection.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::connection::Connection;
use crate::transport::{TcpTransport, Transport, TransportError};

/// Protocol logic plugged into a server.
///
/// Implemented for any `Fn(Bytes, &Arc<Connection<T>>)` closure.
pub trait ConnectionHandler<T: Transport = TcpTransport>: Send + Sync + 'static {
    /// Called from the connection's driver task for every received payload.
    fn on_data_received(&self, data: Bytes, connection: &Arc<Connection<T>>);

    /// Called once when a registered connection stops.
    fn on_connection_closed(&self, _id: u64, _error: Option<&TransportError>) {}
}

impl<T, F> ConnectionHandler<T> for F
where
    T: Transport,
    F: Fn(Bytes, &Arc<Connection<T>>) + Send + Sync + 'static,
{
    fn on_data_received(&self, data: Bytes, connection: &Arc<Connection<T>>) {
        self(data, connection)
    }
}

/// Sends every payload straight back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl<T: Transport> ConnectionHandler<T> for EchoHandler {
    fn on_data_received(&self, data: Bytes, connection: &Arc<Connection<T>>) {
        connection.send(data);
    }
}

/// Accumulates payloads until the text received so far contains a delimiter.
///
/// Unlike [`split_frame`](crate::reader::split_frame) it does not split:
/// once the delimiter shows up anywhere in the accumulated data, the whole
/// accumulation is returned (delimiter included) and the accumulator starts
/// over.
#[derive(Debug, Clone)]
pub struct DelimiterAccumulator {
    delimiter: String,
    data: BytesMut,
}

impl DelimiterAccumulator {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            data: BytesMut::new(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Bytes accumulated since the last completed message.
    pub fn pending(&self) -> usize {
        self.data.len()
    }

    /// Feed received bytes. Returns the accumulated text once it contains
    /// the delimiter. Invalid UTF-8 is replaced, not rejected.
    pub fn push(&mut self, data: &[u8]) -> Option<String> {
        self.data.extend_from_slice(data);

        let text = String::from_utf8_lossy(&self.data);
        if !text.contains(self.delimiter.as_str()) {
            return None;
        }
        let message = text.into_owned();
        self.data.clear();
        Some(message)
    }
}

/// Feeds one [`DelimiterAccumulator`] per connection and hands every
/// completed message to a callback.
pub struct DelimitedHandler<F> {
    delimiter: String,
    accumulators: Mutex<HashMap<Option<u64>, DelimiterAccumulator>>,
    on_message: F,
}

impl<F> DelimitedHandler<F> {
    pub fn new(delimiter: impl Into<String>, on_message: F) -> Self {
        Self {
            delimiter: delimiter.into(),
            accumulators: Mutex::new(HashMap::new()),
            on_message,
        }
    }

    /// Connections with a partially received message.
    pub fn pending_connections(&self) -> usize {
        self.accumulators
            .lock()
            .values()
            .filter(|a| a.pending() > 0)
            .count()
    }
}

impl<T, F> ConnectionHandler<T> for DelimitedHandler<F>
where
    T: Transport,
    F: Fn(String, &Arc<Connection<T>>) + Send + Sync + 'static,
{
    fn on_data_received(&self, data: Bytes, connection: &Arc<Connection<T>>) {
        let message = self
            .accumulators
            .lock()
            .entry(connection.id())
            .or_insert_with(|| DelimiterAccumulator::new(self.delimiter.clone()))
            .push(&data);

        if let Some(message) = message {
            (self.on_message)(message, connection);
        }
    }

    fn on_connection_closed(&self, id: u64, _error: Option<&TransportError>) {
        self.accumulators.lock().remove(&Some(id));
    }
}
