//! Registry of live connections.
//!
//! `ConnectionRegistry` stores non-owning weak references to connections so
//! an endpoint can enumerate and close its connections without keeping them
//! alive. A connection is inserted before its first frame is read and removed
//! when it closes; dead entries are also pruned lazily on enumeration.

use std::sync::{
    Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

use super::{Connection, ConnectionInner};

/// Identifier assigned to a connection, unique within its endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Concurrent registry of connections keyed by [`ConnectionId`].
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Weak<ConnectionInner>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Reserve the id for the next connection.
    pub(crate) fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Insert a newly opened connection.
    pub(crate) fn insert(&self, connection: &Connection) {
        self.connections
            .insert(connection.id(), connection.downgrade().into_inner());
    }

    /// Remove a connection, typically on close.
    pub(crate) fn remove(&self, id: &ConnectionId) { self.connections.remove(id); }

    /// Whether `id` is registered.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Prune stale weak references, then collect the live connections.
    ///
    /// This holds per-bucket write locks while iterating.
    pub(crate) fn active(&self) -> Vec<Connection> {
        let mut live = Vec::with_capacity(self.connections.len());
        self.connections.retain(|_, weak| {
            if let Some(inner) = weak.upgrade() {
                live.push(Connection::from_inner(inner));
                true
            } else {
                false
            }
        });
        live.sort_by_key(Connection::id);
        live
    }

    /// Number of registered entries, including any not yet pruned.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.connections.len() }
}
