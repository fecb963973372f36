// src/engine/fire.rs

//! Applying a session's events to the snapshot.
//!
//! Every path ends here: direct fires scheduled by the scan worker,
//! inline fires under the caller's write action, fires handed back to a
//! blocked dispatch thread, and commits of preprocessed batches.

use tracing::{debug, error};

use crate::engine::core::SessionStage;
use crate::engine::queue::Shared;
use crate::engine::RefreshSession;
use crate::event::{retain_valid, ChangeApplier, ChangeEvent};

/// Hooks around every batch application, run inside the write action.
pub trait RefreshObserver: Send + Sync {
    fn before_refresh_start(&self, _asynchronous: bool) {}
    fn after_refresh_finish(&self, _asynchronous: bool) {}
}

/// Apply a batch. The caller must already be inside a write action.
///
/// Without `prepared` appliers the batch is filtered and the listeners
/// are consulted here; with them the batch is taken as already filtered.
pub(crate) fn apply_in_write(
    shared: &Shared,
    asynchronous: bool,
    events: Vec<ChangeEvent>,
    prepared: Option<Vec<Box<dyn ChangeApplier>>>,
) {
    for observer in &shared.observers {
        observer.before_refresh_start(asynchronous);
    }

    let (events, mut appliers) = match prepared {
        Some(appliers) => (events, appliers),
        None => {
            let events = retain_valid(events, shared.snapshot.as_ref());
            let appliers = shared.listeners.prepare(&events);
            (events, appliers)
        }
    };

    if !events.is_empty() {
        for applier in appliers.iter_mut() {
            applier.before_change();
        }
        shared.snapshot.apply(&events);
        for applier in appliers.iter_mut() {
            applier.after_change();
        }
        debug!(events = events.len(), appliers = appliers.len(), "applied refresh batch");
    }

    for observer in &shared.observers {
        observer.after_refresh_finish(asynchronous);
    }
}

/// Fire a scanned session from its scheduling context, entering a write
/// action for the application.
pub(crate) fn fire_direct(shared: &Shared, mut session: RefreshSession) {
    session.advance(SessionStage::Committing { attempt: 0 });
    let events = session.take_events();

    if !events.is_empty() {
        let asynchronous = session.is_asynchronous();
        let mut batch = Some(events);
        let result = shared.access.run_write(&mut || {
            if let Some(events) = batch.take() {
                apply_in_write(shared, asynchronous, events, None);
            }
        });
        if let Err(e) = result {
            error!(session = %session.id(), error = %e, "could not apply refresh events");
        }
    }

    session.complete();
}

/// Fire a scanned session on a thread that already holds write access.
pub(crate) fn fire_inline(shared: &Shared, mut session: RefreshSession) {
    session.advance(SessionStage::Committing { attempt: 0 });
    let events = session.take_events();
    if !events.is_empty() {
        apply_in_write(shared, session.is_asynchronous(), events, None);
    }
    session.complete();
}
