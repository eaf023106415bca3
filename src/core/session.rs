use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{RelayError, Result};

/// Monotonic identifier of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Bookkeeping entry for a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub label: String,
    pub subscription: String,
    pub connected_at: DateTime<Utc>,
}

/// Tracks which sessions are currently live.
///
/// Routing never reads from the registry; it exists for bookkeeping and
/// diagnostics. Every critical section is a single map operation so the lock
/// is never held across an await point.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next session id
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // Register a live session, rejecting id collisions
    pub fn register(&self, id: SessionId, handle: SessionHandle) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        if sessions.contains_key(&id) {
            return Err(RelayError::DuplicateId(id));
        }
        sessions.insert(id, handle);
        Ok(())
    }

    // Remove a session; absent ids are ignored
    pub fn unregister(&self, id: SessionId) -> Result<()> {
        self.sessions.lock()?.remove(&id);
        Ok(())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions
            .lock()
            .map(|sessions| sessions.contains_key(&id))
            .unwrap_or(false)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the registered handles, ordered by id
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        handles.sort_by_key(|handle| handle.id);
        handles
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Shared session registry
pub type SharedRegistry = Arc<SessionRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: SessionId) -> SessionHandle {
        SessionHandle {
            id,
            label: id.to_string(),
            subscription: format!("sub-{}", id.0),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = SessionRegistry::new();
        let first = registry.next_id();
        let second = registry.next_id();
        assert!(second > first);
        assert_eq!(first.to_string(), "session-1");
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = SessionRegistry::new();
        let id = registry.next_id();

        registry.register(id, handle(id)).unwrap();
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        registry.unregister(id).unwrap();
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let registry = SessionRegistry::new();
        let id = registry.next_id();
        registry.register(id, handle(id)).unwrap();

        let err = registry.register(id, handle(id)).unwrap_err();
        assert_eq!(err, RelayError::DuplicateId(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.unregister(SessionId(42)).is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(SessionRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let id = registry.next_id();
                        registry.register(id, handle(id)).unwrap();
                        registry.unregister(id).unwrap();
                    }
                    let id = registry.next_id();
                    registry.register(id, handle(id)).unwrap();
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
        let ids: Vec<u64> = registry.snapshot().iter().map(|h| h.id.0).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
