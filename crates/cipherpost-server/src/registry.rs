//! Active-session tracking.
//!
//! A liveness hint only: `publish_key` marks a client active and
//! `disconnect` clears it. Mailbox delivery never consults this set.

use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

/// Set of clients that have announced themselves.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `client_id` active. Returns false if it already was.
    pub fn register(&self, client_id: &str) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).insert(client_id.to_string())
    }

    /// Clear `client_id`. Returns false if it was not active.
    pub fn remove(&self, client_id: &str) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).remove(client_id)
    }

    /// True if `client_id` has registered and not disconnected.
    pub fn is_active(&self, client_id: &str) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).contains(client_id)
    }

    /// Number of active clients.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let registry = SessionRegistry::new();

        assert!(registry.register("alice"));
        assert!(!registry.register("alice"));
        assert!(registry.is_active("alice"));
        assert_eq!(registry.active_count(), 1);

        assert!(registry.remove("alice"));
        assert!(!registry.remove("alice"));
        assert!(!registry.is_active("alice"));
    }
}
