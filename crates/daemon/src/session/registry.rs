//! Process-wide registry of live backend sessions.
//!
//! The registry is the only state shared between client connections. It
//! maps each connection identity to at most one live handle; every other
//! piece of session state is owned by the connection's own task.

use std::sync::Arc;

use dashmap::DashMap;

use super::{ConnectionId, SessionHandle};

/// Maps connection identities to their live backend session handles.
///
/// Invariant: an entry exists if and only if the corresponding backend
/// session is Ready or Streaming. The orchestrator registers on entering
/// Ready and deregisters on entering a terminal state.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<dyn SessionHandle>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a handle for `id`.
    ///
    /// If the identity already has a live handle, the old one is torn down
    /// first; two concurrent backend sessions for one identity are never
    /// allowed to coexist.
    pub async fn register(&self, id: &ConnectionId, handle: Arc<dyn SessionHandle>) {
        if let Some(previous) = self.sessions.insert(id.clone(), handle) {
            tracing::warn!(
                connection_id = %id,
                "Replacing live session for identity; ending the old one"
            );
            previous.end().await;
        } else {
            tracing::debug!(connection_id = %id, "Registered backend session");
        }
    }

    /// Removes the entry for `id`, returning the handle if one was present.
    ///
    /// The caller owns the returned handle's teardown.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Arc<dyn SessionHandle>> {
        let removed = self.sessions.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::debug!(connection_id = %id, "Deregistered backend session");
        }
        removed
    }

    /// Returns whether an entry exists for `id`.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Ends every registered session. Called on process shutdown.
    pub async fn drain(&self) {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((id, handle)) = self.sessions.remove(&id) {
                tracing::info!(connection_id = %id, "Ending session on shutdown");
                handle.end().await;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
