// src/engine/preprocessor.rs

//! Off-dispatch preprocessing of asynchronous sessions.
//!
//! A round records the generation, filters the batch and asks the listeners
//! for appliers, all without write access. The commit is then scheduled in
//! the session's context, where the generation is checked again: if any
//! write action started in between, the appliers are discarded and the
//! session goes through another round.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::activity::ActivityGuard;
use crate::engine::core::{commit_decision, CommitDecision, SessionStage};
use crate::engine::fire::apply_in_write;
use crate::engine::queue::{log_rejection, Shared};
use crate::engine::RefreshSession;
use crate::event::{retain_valid, ChangeApplier, ChangeEvent};

/// A session waiting for a preprocessing round. It counts as in-flight
/// activity from the moment it is created until the round is prepared.
pub(crate) struct PreprocessJob {
    session: RefreshSession,
    attempt: u32,
    activity: ActivityGuard,
}

impl PreprocessJob {
    pub(crate) fn first(shared: &Shared, session: RefreshSession) -> Self {
        Self::round(shared, session, 1)
    }

    fn round(shared: &Shared, session: RefreshSession, attempt: u32) -> Self {
        Self {
            session,
            attempt,
            activity: shared.activity.guard(),
        }
    }
}

/// Result of one preprocessing round, waiting to be committed.
struct PreparedBatch {
    session: RefreshSession,
    events: Vec<ChangeEvent>,
    appliers: Vec<Box<dyn ChangeApplier>>,
    generation: u64,
    attempt: u32,
}

pub(crate) fn spawn_preprocessor(
    handle: &Handle,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<PreprocessJob>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        info!("preprocessor started");

        while let Some(job) = rx.recv().await {
            handle_preprocess_job(&shared, job).await;
        }

        info!("preprocessor finished (channel closed)");
    })
}

async fn handle_preprocess_job(shared: &Arc<Shared>, job: PreprocessJob) {
    let PreprocessJob {
        mut session,
        attempt,
        activity,
    } = job;
    let id = session.id();

    if shared.is_disposed() {
        debug!(session = %id, attempt, "queue disposed; dropping session before preprocessing");
        return;
    }

    let batch = {
        let _activity = activity;
        session.advance(SessionStage::Preprocessing { attempt });

        let round_shared = Arc::clone(shared);
        let prepared =
            tokio::task::spawn_blocking(move || prepare(&round_shared, session, attempt)).await;

        match prepared {
            Ok(batch) => batch,
            Err(e) => {
                error!(session = %id, attempt, error = %e, "preprocessing task did not complete");
                return;
            }
        }
    };

    let context = batch.session.context();
    let commit_shared = Arc::clone(shared);
    let scheduled = shared
        .scheduler
        .schedule(context, Box::new(move || commit(&commit_shared, batch)));
    if let Err(e) = scheduled {
        log_rejection(&e, id);
    }
}

fn prepare(shared: &Shared, session: RefreshSession, attempt: u32) -> PreparedBatch {
    let generation = shared.generation.current();
    let events = retain_valid(session.events().to_vec(), shared.snapshot.as_ref());
    let appliers = shared.listeners.prepare(&events);
    debug!(
        session = %session.id(),
        attempt,
        generation,
        events = events.len(),
        appliers = appliers.len(),
        "preprocessed batch"
    );
    PreparedBatch {
        session,
        events,
        appliers,
        generation,
        attempt,
    }
}

/// Runs in the session's scheduling context.
fn commit(shared: &Arc<Shared>, batch: PreparedBatch) {
    let PreparedBatch {
        mut session,
        events,
        appliers,
        generation,
        attempt,
    } = batch;
    session.advance(SessionStage::Committing { attempt });

    match commit_decision(generation, shared.generation.current()) {
        CommitDecision::Apply => {
            if !events.is_empty() {
                let mut prepared = Some((events, appliers));
                let result = shared.access.run_write(&mut || {
                    if let Some((events, appliers)) = prepared.take() {
                        apply_in_write(shared, true, events, Some(appliers));
                    }
                });
                if let Err(e) = result {
                    error!(session = %session.id(), error = %e, "could not apply preprocessed events");
                }
            }
            session.complete();
        }
        CommitDecision::Retry => {
            debug!(session = %session.id(), attempt, "batch went stale before commit; preprocessing again");
            drop(appliers);
            let id = session.id();
            let retry = PreprocessJob::round(shared, session, attempt + 1);
            if let Err(e) = shared.submit_preprocess(retry) {
                log_rejection(&e, id);
            }
        }
    }
}
