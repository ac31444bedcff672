//! Registry of live control connections.
//!
//! The registry owns every accepted connection for its whole lifetime.
//! Removing an entry is the only way a connection is destroyed, and removal
//! always runs the connection's [`Close`] action.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate a fresh identity. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Release action run when a connection leaves the registry.
pub trait Close {
    fn close(&mut self);
}

/// Errors from registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// Ordered collection of live connections keyed by identity.
#[derive(Debug)]
pub struct Registry<C: Close> {
    entries: BTreeMap<ConnectionId, C>,
}

impl<C: Close> Registry<C> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add a live connection.
    ///
    /// A duplicate id is rejected and the rejected connection is closed, so
    /// ownership still ends on the close path.
    pub fn insert(&mut self, id: ConnectionId, mut connection: C) -> Result<(), RegistryError> {
        if self.entries.contains_key(&id) {
            connection.close();
            return Err(RegistryError::Duplicate(id));
        }
        self.entries.insert(id, connection);
        Ok(())
    }

    /// Remove a connection and run its close action.
    ///
    /// Returns `false` if nothing was registered under `id`.
    pub fn remove_and_close(&mut self, id: ConnectionId) -> bool {
        match self.entries.remove(&id) {
            Some(mut connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Close and remove every connection, in id order. Returns the count.
    pub fn close_all(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        for (_, mut connection) in entries {
            connection.close();
        }
        count
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut C> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Close> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Probe {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Close for Probe {
        fn close(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn probe(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Probe {
        Probe {
            name,
            log: Rc::clone(log),
        }
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a.to_string(), format!("conn#{}", a.get()));
    }

    #[test]
    fn test_insert_and_remove_closes_entry() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        let id = ConnectionId::next();

        registry.insert(id, probe("a", &log)).unwrap();
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        assert!(log.borrow().is_empty());

        assert!(registry.remove_and_close(id));
        assert!(registry.is_empty());
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry: Registry<Probe> = Registry::new();
        assert!(!registry.remove_and_close(ConnectionId::next()));
    }

    #[test]
    fn test_duplicate_insert_closes_rejected_connection() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        let id = ConnectionId::next();

        registry.insert(id, probe("first", &log)).unwrap();
        let err = registry.insert(id, probe("second", &log)).unwrap_err();

        assert_eq!(err, RegistryError::Duplicate(id));
        assert_eq!(*log.borrow(), vec!["second"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_all_runs_in_id_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        let third = ConnectionId::next();

        registry.insert(third, probe("third", &log)).unwrap();
        registry.insert(first, probe("first", &log)).unwrap();
        registry.insert(second, probe("second", &log)).unwrap();
        assert_eq!(
            registry.ids().collect::<Vec<_>>(),
            vec![first, second, third]
        );

        assert_eq!(registry.close_all(), 3);
        assert!(registry.is_empty());
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }
}
