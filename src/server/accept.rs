//! Socket server: accept loop plus connection registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{ConnectionHandler, ConnectionRegistry};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;
use crate::transport::{Listener, TcpListenerTransport, Transport};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

type SharedRegistry<T> = Arc<Mutex<ConnectionRegistry<T>>>;

/// A listening server.
///
/// Every accepted connection gets the next identifier, is registered until
/// it stops, and routes its received data to the server's handler.
///
/// # Example
///
/// ```ignore
/// use sockwire::server::{EchoHandler, SocketServer};
///
/// let server = SocketServer::bind(9000, EchoHandler).await?;
/// server.start(false);
/// // ...
/// server.stop();
/// ```
pub struct SocketServer<L: Listener = TcpListenerTransport> {
    listener: Arc<L>,
    handler: Arc<dyn ConnectionHandler<L::Transport>>,
    registry: SharedRegistry<L::Transport>,
    config: ConnectionConfig,
    debug: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketServer<TcpListenerTransport> {
    /// Bind a TCP listener on `0.0.0.0:port`. Port 0 picks a free port.
    ///
    /// The server does not accept until [`start`](Self::start) is called.
    pub async fn bind(port: u16, handler: impl ConnectionHandler) -> Result<Self> {
        let listener = TcpListenerTransport::bind(port).await?;
        Ok(Self::bind_with(listener, handler, ConnectionConfig::default()))
    }
}

impl<L: Listener> SocketServer<L> {
    /// Create a server over an existing listener.
    pub fn bind_with(
        listener: L,
        handler: impl ConnectionHandler<L::Transport>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            listener: Arc::new(listener),
            handler: Arc::new(handler),
            registry: Arc::new(Mutex::new(ConnectionRegistry::new())),
            config,
            debug: AtomicBool::new(false),
            accept_task: Mutex::new(None),
        }
    }

    /// Start accepting. Calling it again while running has no effect.
    pub fn start(&self, debug: bool) -> &Self {
        let mut task = self.accept_task.lock();
        if task.is_some() {
            return self;
        }
        self.debug.store(debug, Ordering::Relaxed);

        tracing::info!(addr = ?self.listener.local_addr(), "Server listening");
        *task = Some(tokio::spawn(accept_loop(
            self.listener.clone(),
            self.handler.clone(),
            self.registry.clone(),
            self.config.clone(),
            debug,
        )));
        self
    }

    /// Stop accepting and stop every registered connection.
    ///
    /// Stop notifications of the registered connections are detached first,
    /// so the handler sees exactly one `on_connection_closed` per connection.
    pub fn stop(&self) {
        self.listener.cancel();
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }

        let connections = self.registry.lock().drain();
        for connection in connections {
            let detached = connection.clear_on_stop();
            connection.stop();
            if let (true, Some(id)) = (detached, connection.id()) {
                self.handler.on_connection_closed(id, None);
            }
        }

        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!("Server did stop");
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Identifiers of live connections, ascending.
    pub fn connection_ids(&self) -> Vec<u64> {
        self.registry.lock().ids()
    }

    /// Look up a live connection.
    pub fn connection(&self, id: u64) -> Option<Arc<Connection<L::Transport>>> {
        self.registry.lock().get(id)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.accept_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<L: Listener> Drop for SocketServer<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop<L: Listener>(
    listener: Arc<L>,
    handler: Arc<dyn ConnectionHandler<L::Transport>>,
    registry: SharedRegistry<L::Transport>,
    config: ConnectionConfig,
    debug: bool,
) {
    loop {
        match listener.accept().await {
            Ok(transport) => {
                let connection = admit(transport, &handler, &registry, &config, debug);
                tokio::spawn(async move {
                    if let Err(e) = connection.start().await {
                        tracing::warn!(connection = ?connection.id(), "Accepted connection failed: {}", e);
                    }
                });
            }
            Err(e) => {
                if listener.is_cancelled() {
                    break;
                }
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }

    if debug {
        tracing::debug!("Accept loop ended");
    }
}

/// Register an accepted transport and wire it to the handler.
fn admit<T: Transport>(
    transport: T,
    handler: &Arc<dyn ConnectionHandler<T>>,
    registry: &SharedRegistry<T>,
    config: &ConnectionConfig,
    debug: bool,
) -> Arc<Connection<T>> {
    let weak: Weak<Mutex<ConnectionRegistry<T>>> = Arc::downgrade(registry);

    registry.lock().register(|id| {
        let connection = Connection::with_id(transport, id, config.clone());
        connection.set_debug(debug);

        let on_closed = handler.clone();
        connection.set_on_stop(move |error| {
            if let Some(registry) = weak.upgrade() {
                registry.lock().remove(id);
            }
            on_closed.on_connection_closed(id, error.as_ref());
        });

        let on_data = handler.clone();
        connection.set_data_handler(move |data, connection| {
            on_data.on_data_received(data, connection)
        });

        if debug {
            tracing::debug!(connection = id, "Accepted connection");
        }
        connection
    })
}
