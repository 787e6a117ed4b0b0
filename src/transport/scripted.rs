//! In-memory transport driven by tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::{wait_cancelled, Received, Transport, TransportError, TransportState};

/// A transport whose states and inbound data are pushed by the test.
pub(crate) struct ScriptedTransport {
    initial: Vec<TransportState>,
    events: Mutex<Option<UnboundedSender<TransportState>>>,
    inbound_tx: UnboundedSender<Received>,
    inbound_rx: AsyncMutex<UnboundedReceiver<Received>>,
    sent: Mutex<Vec<Bytes>>,
    send_error: Mutex<Option<TransportError>>,
    starts: AtomicUsize,
    cancels: AtomicUsize,
    cancelled: watch::Sender<bool>,
}

impl ScriptedTransport {
    /// A transport that publishes `initial` as soon as it is started.
    pub(crate) fn new(initial: Vec<TransportState>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            initial,
            events: Mutex::new(None),
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            starts: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            cancelled: watch::Sender::new(false),
        }
    }

    /// Goes `Preparing` then `Ready` on start.
    pub(crate) fn ready() -> Self {
        Self::new(vec![TransportState::Preparing, TransportState::Ready])
    }

    pub(crate) fn emit(&self, state: TransportState) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(state);
        }
    }

    pub(crate) fn push_data(&self, data: &'static [u8]) {
        let _ = self.inbound_tx.send(Received::data(Bytes::from_static(data)));
    }

    pub(crate) fn push(&self, received: Received) {
        let _ = self.inbound_tx.send(received);
    }

    pub(crate) fn fail_sends_with(&self, error: TransportError) {
        *self.send_error.lock() = Some(error);
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn start(&self) -> UnboundedReceiver<TransportState> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        for state in &self.initial {
            let _ = tx.send(state.clone());
        }
        *self.events.lock() = Some(tx);
        rx
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.send_replace(true);
        self.emit(TransportState::Cancelled);
    }

    fn receive(
        &self,
        _min_bytes: usize,
        _max_bytes: usize,
    ) -> impl Future<Output = Received> + Send + '_ {
        async move {
            let mut cancelled = self.cancelled.subscribe();
            let mut inbound = self.inbound_rx.lock().await;
            tokio::select! {
                received = inbound.recv() => received.unwrap_or_else(Received::end),
                _ = wait_cancelled(&mut cancelled) => Received::end(),
            }
        }
    }

    fn send(&self, data: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send + '_ {
        async move {
            let error = self.send_error.lock().clone();
            if let Some(error) = error {
                return Err(error);
            }
            self.sent.lock().push(data);
            Ok(())
        }
    }
}
