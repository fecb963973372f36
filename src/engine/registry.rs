// src/engine/registry.rs

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::engine::CancelFlag;
use crate::types::SessionId;

#[derive(Debug)]
struct RegisteredSession {
    cancel: CancelFlag,
    roots: Vec<PathBuf>,
}

/// Sessions that are currently scanning, by id.
///
/// Used for cancellation by id, for cancelling everything at shutdown, and
/// for the "refresh in progress" query.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, RegisteredSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scanning session. The unregistered id is ignored; returns
    /// whether an entry was added.
    pub fn register(&self, id: SessionId, cancel: CancelFlag, roots: Vec<PathBuf>) -> bool {
        if !id.is_registrable() {
            return false;
        }
        trace!(session = %id, "registering session");
        self.sessions
            .lock()
            .insert(id, RegisteredSession { cancel, roots });
        true
    }

    pub fn unregister(&self, id: SessionId) -> bool {
        self.sessions.lock().remove(&id).is_some()
    }

    /// Register for the lifetime of the returned guard.
    pub(crate) fn enter(&self, id: SessionId, cancel: &CancelFlag, roots: &[PathBuf]) -> Registration<'_> {
        let registered = self.register(id, cancel.clone(), roots.to_vec());
        Registration {
            registry: self,
            id,
            registered,
        }
    }

    /// Signal cancellation to the session with `id`, if it is scanning.
    pub fn cancel(&self, id: SessionId) -> bool {
        match self.sessions.lock().get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered session and clear the registry. Returns how
    /// many sessions were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelled all registered sessions");
        }
        drained.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Roots of every scanning session, ordered by session id.
    pub fn active_roots(&self) -> Vec<(SessionId, Vec<PathBuf>)> {
        let mut roots: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.roots.clone()))
            .collect();
        roots.sort_by_key(|(id, _)| *id);
        roots
    }
}

/// Keeps a session registered until dropped.
pub(crate) struct Registration<'a> {
    registry: &'a SessionRegistry,
    id: SessionId,
    registered: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.registry.unregister(self.id);
        }
    }
}
