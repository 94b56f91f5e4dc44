//! Registry of courier connections
//!
//! Maps a courier to its active connection handle. A new registration
//! for the same courier silently replaces the prior handle
//! (last-writer-wins); the replaced handle is not closed here.

use crate::domain::protocol::{ConnectionHandle, ConnectionId};
use crate::domain::types::CourierId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<FxHashMap<CourierId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional upsert; no error conditions
    pub fn register(&self, courier_id: CourierId, handle: ConnectionHandle) {
        self.inner.write().insert(courier_id, handle);
    }

    /// Remove the entry whose stored handle matches the given connection.
    ///
    /// No-op when none matches, which tolerates disconnects from
    /// connections that never registered and keeps a stale disconnect
    /// from a replaced connection from evicting the newer registration.
    pub fn unregister_by_handle(&self, connection_id: &ConnectionId) {
        self.inner.write().retain(|_, handle| handle.id() != connection_id);
    }

    pub fn lookup(&self, courier_id: CourierId) -> Option<ConnectionHandle> {
        self.inner.read().get(&courier_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::ServerMessage;
    use tokio::sync::mpsc;

    fn handle() -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel::<ServerMessage>(8);
        ConnectionHandle::new(ConnectionId::new(), tx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let h = handle();
        registry.register(CourierId(1), h.clone());
        assert_eq!(registry.lookup(CourierId(1)).unwrap().id(), h.id());
        assert!(registry.lookup(CourierId(2)).is_none());
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = ConnectionRegistry::new();
        let first = handle();
        let second = handle();
        registry.register(CourierId(1), first);
        registry.register(CourierId(1), second.clone());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(CourierId(1)).unwrap().id(), second.id());
    }

    #[test]
    fn test_unregister_by_handle() {
        let registry = ConnectionRegistry::new();
        let h = handle();
        registry.register(CourierId(1), h.clone());
        registry.unregister_by_handle(h.id());
        assert!(registry.lookup(CourierId(1)).is_none());
    }

    #[test]
    fn test_unregister_unknown_handle_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.register(CourierId(1), handle());
        registry.unregister_by_handle(&ConnectionId::new());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_registration() {
        let registry = ConnectionRegistry::new();
        let old = handle();
        let new = handle();
        registry.register(CourierId(1), old.clone());
        registry.register(CourierId(1), new.clone());
        // The replaced connection disconnects afterwards
        registry.unregister_by_handle(old.id());
        assert_eq!(registry.lookup(CourierId(1)).unwrap().id(), new.id());
    }
}
