// src/event/listener.rs

//! Asynchronous file listeners and the appliers they compute.
//!
//! Listeners see a filtered batch *before* it is applied and return an
//! applier describing what they want to do around the application. Computing
//! an applier must not mutate shared state; the applier's hooks run later,
//! inside the write action that applies the batch, and only if the batch is
//! still current.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::event::ChangeEvent;

/// Deferred work computed by a listener for one batch.
pub trait ChangeApplier: Send {
    /// Runs inside the write action, before the snapshot changes.
    fn before_change(&mut self) {}

    /// Runs inside the write action, after the snapshot changed.
    fn after_change(&mut self) {}
}

/// A listener that inspects batches off the dispatch thread.
pub trait AsyncFileListener: Send + Sync {
    /// Return `None` when the batch is of no interest.
    fn prepare_change(&self, events: &[ChangeEvent]) -> Option<Box<dyn ChangeApplier>>;
}

/// Source of appliers for a batch of events.
pub trait ListenerRegistry: Send + Sync {
    fn prepare(&self, events: &[ChangeEvent]) -> Vec<Box<dyn ChangeApplier>>;
}

/// Default registry: runs every registered listener in registration order.
#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Vec<Arc<dyn AsyncFileListener>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.read().len())
            .finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn AsyncFileListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl ListenerRegistry for Listeners {
    fn prepare(&self, events: &[ChangeEvent]) -> Vec<Box<dyn ChangeApplier>> {
        if events.is_empty() {
            return Vec::new();
        }
        // Clone the list so listeners run without holding the registry lock.
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        let appliers: Vec<_> = listeners
            .iter()
            .filter_map(|l| l.prepare_change(events))
            .collect();
        debug!(
            events = events.len(),
            listeners = listeners.len(),
            appliers = appliers.len(),
            "computed change appliers"
        );
        appliers
    }
}
