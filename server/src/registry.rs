//! Concurrent client registry.
//!
//! Maps client identifiers to their sessions. Every connection thread, the
//! acceptor and any broadcaster touch it at the same time, so it is backed by
//! a sharded `DashMap` and callers never hold a lock across calls.
//! Presence in the registry is the single source of truth for whether a
//! client is still connected.

use crate::error::RegistryError;
use crate::session::{ClientId, ClientSession};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: DashMap<ClientId, Arc<ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the session unless its identifier is already taken.
    /// Never overwrites an existing entry.
    pub fn try_insert(&self, session: Arc<ClientSession>) -> Result<(), RegistryError> {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(entry) => Err(RegistryError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes whatever session is registered under `id`
    pub fn remove(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Removes `session` only if it is still the entry registered under its id
    pub fn remove_session(&self, session: &Arc<ClientSession>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, registered| Arc::ptr_eq(registered, session))
            .is_some()
    }

    /// Point-in-time copy of every registered session.
    ///
    /// Sessions removed after the copy is taken stay valid to use; sends to
    /// them are simply dropped.
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::thread;
    use tokio::sync::mpsc;

    fn session(id: &str) -> Arc<ClientSession> {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(ClientSession::new(id, addr, tx))
    }

    #[test]
    fn test_insert_and_get() {
        let registry = ClientRegistry::new();
        registry.try_insert(session("a")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").unwrap().id(), "a");
    }

    #[test]
    fn test_get_missing_is_none() {
        let registry = ClientRegistry::new();
        assert!(registry.get("nobody").is_none());
        assert!(registry.remove("nobody").is_none());
    }

    #[test]
    fn test_duplicate_insert_keeps_original() {
        let registry = ClientRegistry::new();
        let original = session("a");
        registry.try_insert(Arc::clone(&original)).unwrap();

        let result = registry.try_insert(session("a"));
        assert_eq!(result, Err(RegistryError::Duplicate("a".to_string())));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get("a").unwrap(), &original));
    }

    #[test]
    fn test_remove_session_ignores_replacement() {
        let registry = ClientRegistry::new();
        let stale = session("a");
        registry.try_insert(Arc::clone(&stale)).unwrap();
        registry.remove("a");

        let fresh = session("a");
        registry.try_insert(Arc::clone(&fresh)).unwrap();

        assert!(!registry.remove_session(&stale));
        assert!(registry.contains("a"));
        assert!(registry.remove_session(&fresh));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_survives_removal() {
        let registry = ClientRegistry::new();
        for id in ["a", "b", "c"] {
            registry.try_insert(session(id)).unwrap();
        }

        let snapshot = registry.snapshot();
        for id in ["a", "b", "c"] {
            registry.remove(id);
        }

        assert_eq!(snapshot.len(), 3);
        assert!(registry.is_empty());

        let mut ids = snapshot.iter().map(|s| s.id().to_string()).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_inserts_same_id() {
        let registry = Arc::new(ClientRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_insert(session("shared")).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_and_iterate() {
        let registry = Arc::new(ClientRegistry::new());

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..500 {
                    registry.try_insert(session(&format!("client-{}", i))).unwrap();
                    if i % 2 == 0 {
                        registry.remove(&format!("client-{}", i));
                    }
                }
            })
        };

        for _ in 0..50 {
            let _ = registry.snapshot();
        }

        writer.join().unwrap();
        assert_eq!(registry.len(), 250);
    }
}
