//! Session Registry
//!
//! Sessions are opaque correlation tokens: a client's SSE stream and its POST
//! calls share one ID. The registry only tracks validity; invalidation is
//! driven by DELETE requests, stream-death detection and server shutdown.

use parking_lot::RwLock;
use std::collections::HashSet;

/// Process-wide set of live session IDs, shared behind an `Arc` by the
/// transport and its keep-alive loop.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: RwLock<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new session and return its ID.
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.active.write().insert(id.clone());
        tracing::debug!(session_id = %id, "session created");
        id
    }

    pub fn is_valid(&self, id: &str) -> bool {
        !id.is_empty() && self.active.read().contains(id)
    }

    /// Remove a session. Unknown IDs are ignored.
    pub fn invalidate(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let removed = self.active.write().remove(id);
        if removed {
            tracing::debug!(session_id = %id, "session invalidated");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.active.write().clear();
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn created_sessions_are_valid_until_invalidated() {
        let sessions = SessionRegistry::new();
        let id = sessions.create();
        assert!(sessions.is_valid(&id));
        assert!(sessions.invalidate(&id));
        assert!(!sessions.is_valid(&id));
        assert!(!sessions.invalidate(&id));
    }

    #[test]
    fn empty_and_unknown_ids_are_invalid() {
        let sessions = SessionRegistry::new();
        assert!(!sessions.is_valid(""));
        assert!(!sessions.is_valid("not-a-session"));
        assert!(!sessions.invalidate(""));
    }

    #[test]
    fn clear_all_drops_every_session() {
        let sessions = SessionRegistry::new();
        let a = sessions.create();
        let b = sessions.create();
        assert_ne!(a, b);
        assert_eq!(sessions.len(), 2);
        sessions.clear_all();
        assert!(sessions.is_empty());
        assert!(!sessions.is_valid(&a));
    }

    #[test]
    fn concurrent_creation_yields_unique_ids() {
        let sessions = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                std::thread::spawn(move || (0..50).map(|_| sessions.create()).collect::<Vec<_>>())
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(sessions.len(), 400);
    }
}
