//! Connection lifecycle tracking.
//!
//! Each accepted connection moves through a fixed sequence of states and is
//! recorded in a shared registry until its handler finishes.

use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::trace;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, no request bytes seen yet.
    AwaitingData,
    /// Reading the header block.
    Framing,
    /// Validating the header block and reading any body.
    Parsing,
    /// Executing the request against the file store.
    Dispatching,
    /// Response (if any) written, stream shut down.
    Closed,
}

/// A single client connection as seen by its handler.
#[derive(Debug)]
pub struct Connection {
    pub id: usize,
    pub peer: SocketAddr,
    state: ConnState,
}

impl Connection {
    pub fn new(id: usize, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: ConnState::AwaitingData,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Move to the next state. Any state may jump straight to `Closed`.
    pub fn advance(&mut self, next: ConnState) {
        debug_assert!(
            next == ConnState::Closed || next as u8 == self.state as u8 + 1,
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(conn_id = self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

/// Bookkeeping for a connection whose handler is still running.
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub peer: SocketAddr,
    pub accepted_at: Instant,
}

/// Registry of live connection handlers using slab allocation.
///
/// Keys are unique among live entries and are reused after removal.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<ActiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a new connection. The entry lives as long as the guard.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> RegistrationGuard {
        let id = self.lock().insert(ActiveConnection {
            peer,
            accepted_at: Instant::now(),
        });
        RegistrationGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of handlers currently running.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, id: usize) -> Option<ActiveConnection> {
        self.lock().get(id).cloned()
    }

    fn remove(&self, id: usize) -> Option<ActiveConnection> {
        self.lock().try_remove(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slab<ActiveConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its registry entry when dropped, including on panic unwind.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    id: usize,
}

impl RegistrationGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.registry.remove(self.id) {
            trace!(
                conn_id = self.id,
                peer = %conn.peer,
                elapsed_ms = conn.accepted_at.elapsed().as_millis() as u64,
                "Connection deregistered"
            );
        }
    }
}
