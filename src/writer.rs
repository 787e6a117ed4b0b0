//! Per-connection send queue.
//!
//! `send` is fire-and-forget for callers, but payloads must reach the
//! transport in the order they were queued. Every connection owns one
//! unbounded channel drained by a dedicated writer task:
//!
//! ```text
//! send() ─┐
//! send() ─┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► Transport::send
//! send() ─┘
//! ```
//!
//! Payloads that are already queued when the writer wakes up are coalesced
//! into one transport write. A failed write stops the connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{wait_terminal, Connection};
use crate::transport::Transport;

/// Maximum payloads to coalesce into a single transport write.
const MAX_BATCH_SIZE: usize = 64;

/// Maximum bytes to coalesce into a single transport write.
const MAX_BATCH_BYTES: usize = 256 * 1024;

/// Queue side of a connection's writer.
pub(crate) struct SendQueue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    pending: Arc<AtomicUsize>,
}

impl SendQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a payload. Returns `false` once the writer has gone away.
    pub(crate) fn push(&self, data: Bytes) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(data).is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            return false;
        }
        true
    }

    /// Payloads queued but not yet handed to the transport.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Hand the receiving side to the writer task. Only the first call gets it.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.rx.lock().take()
    }

    pub(crate) fn pending_counter(&self) -> Arc<AtomicUsize> {
        self.pending.clone()
    }
}

/// Join `first` with whatever else is already queued.
///
/// Returns the coalesced payload and how many queued payloads it contains.
fn next_batch(rx: &mut mpsc::UnboundedReceiver<Bytes>, first: Bytes) -> (Bytes, usize) {
    let mut count = 1;
    let mut total = first.len();
    let mut batch: Option<BytesMut> = None;

    while count < MAX_BATCH_SIZE && total < MAX_BATCH_BYTES {
        match rx.try_recv() {
            Ok(next) => {
                let buf = batch.get_or_insert_with(|| {
                    let mut buf = BytesMut::with_capacity(total + next.len());
                    buf.extend_from_slice(&first);
                    buf
                });
                buf.extend_from_slice(&next);
                total += next.len();
                count += 1;
            }
            Err(_) => break,
        }
    }

    match batch {
        Some(buf) => (buf.freeze(), count),
        // Single payload goes through untouched.
        None => (first, 1),
    }
}

/// Spawn the writer task for `connection`, if it has not been spawned yet.
pub(crate) fn spawn_writer_task<T: Transport>(connection: &Arc<Connection<T>>) {
    let Some(rx) = connection.send_queue().take_receiver() else {
        return;
    };
    let pending = connection.send_queue().pending_counter();
    tokio::spawn(writer_loop(rx, connection.clone(), pending));
}

/// Drain the queue into the transport until the connection stops.
async fn writer_loop<T: Transport>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    connection: Arc<Connection<T>>,
    pending: Arc<AtomicUsize>,
) {
    let mut state = connection.subscribe();

    loop {
        let first = tokio::select! {
            next = rx.recv() => match next {
                Some(data) => data,
                None => return,
            },
            _ = wait_terminal(&mut state) => return,
        };

        let (batch, count) = next_batch(&mut rx, first);
        let len = batch.len();
        let result = connection.transport().send(batch).await;
        pending.fetch_sub(count, Ordering::Release);

        match result {
            Ok(()) => connection.log_sent(len),
            Err(e) => {
                connection.fail(e);
                return;
            }
        }
    }
}
