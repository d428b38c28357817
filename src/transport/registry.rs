//! Live-connection registry shared by a listener and its connections' close hooks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::transport::connection::{Connection, ConnectionId};

/// Set of live connections keyed by id.
///
/// All operations take a short lock and never call into a connection while
/// holding it; callers work on the returned snapshot instead.
pub struct Registry<C> {
    connections: Mutex<HashMap<ConnectionId, Connection<C>>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection<C>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, connection: Connection<C>) {
        self.lock().insert(connection.id(), connection);
    }

    /// Remove by id. Removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection<C>> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection<C>> {
        self.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Copy of the current membership
    pub fn snapshot(&self) -> Vec<Connection<C>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empty the registry, returning what it held
    pub fn drain(&self) -> Vec<Connection<C>> {
        self.lock().drain().map(|(_, c)| c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::transport::connection::event_channel;

    fn connection() -> (Connection, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(64);
        let (tx, _rx) = event_channel();
        (
            Connection::from_stream(local, None, ConnectionConfig::default(), (), tx),
            remote,
        )
    }

    #[tokio::test]
    async fn test_insert_remove_snapshot() {
        let registry = Registry::new();
        let (a, _ra) = connection();
        let (b, _rb) = connection();

        registry.insert(a.clone());
        registry.insert(b.clone());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));

        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());
        assert_eq!(registry.snapshot(), vec![b.clone()]);

        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
