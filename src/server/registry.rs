//! Registry of live server connections.
//!
//! Identifiers are assigned sequentially from 0 by the owning server and
//! are never reused, even after the connection has been removed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Connection;
use crate::transport::{TcpTransport, Transport};

/// Live connections keyed by identifier.
pub struct ConnectionRegistry<T: Transport = TcpTransport> {
    connections: HashMap<u64, Arc<Connection<T>>>,
    next_id: u64,
}

impl<T: Transport> ConnectionRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 0,
        }
    }

    /// The identifier the next registration will get.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Assign the next identifier, build the connection with it and insert it.
    pub fn register(&mut self, make: impl FnOnce(u64) -> Arc<Connection<T>>) -> Arc<Connection<T>> {
        let id = self.next_id;
        self.next_id += 1;

        let connection = make(id);
        self.connections.insert(id, connection.clone());
        connection
    }

    /// Remove a connection. Returns it if it was present.
    pub fn remove(&mut self, id: u64) -> Option<Arc<Connection<T>>> {
        self.connections.remove(&id)
    }

    /// Look up a connection.
    pub fn get(&self, id: u64) -> Option<Arc<Connection<T>>> {
        self.connections.get(&id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every connection. The id counter is kept.
    pub fn drain(&mut self) -> Vec<Arc<Connection<T>>> {
        self.connections.drain().map(|(_, c)| c).collect()
    }
}

impl<T: Transport> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
