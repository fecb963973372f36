// src/engine/scan_worker.rs

//! The scan worker: a single consumer of the bounded scan queue.
//!
//! Scans run on the blocking pool but the loop awaits each one before
//! taking the next job, so at most one queued scan is in flight at a time.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::fire::fire_direct;
use crate::engine::preprocessor::PreprocessJob;
use crate::engine::queue::{log_rejection, Shared};
use crate::engine::RefreshSession;

/// Where a session goes once its scan is done.
pub(crate) enum ScanRoute {
    /// Preprocess (asynchronous sessions, when enabled) or schedule a
    /// direct fire in the session's context.
    Fire,
    /// Give the scanned session back to a caller blocked on the dispatch
    /// thread, which fires it itself.
    ReturnToCaller(oneshot::Sender<RefreshSession>),
}

pub(crate) struct ScanJob {
    pub(crate) session: RefreshSession,
    pub(crate) route: ScanRoute,
}

pub(crate) fn spawn_scan_worker(
    handle: &Handle,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<ScanJob>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        info!("scan worker started");

        while let Some(job) = rx.recv().await {
            handle_scan_job(&shared, job).await;
        }

        info!("scan worker finished (channel closed)");
    })
}

async fn handle_scan_job(shared: &Arc<Shared>, job: ScanJob) {
    let ScanJob { session, route } = job;
    let id = session.id();

    if shared.is_disposed() {
        debug!(session = %id, "queue disposed; dropping session before scan");
        session.cancel_flag().cancel();
        return;
    }

    // Held until the session is routed, so a hand-off to the preprocessor
    // never drops the count to zero in between.
    let _activity = shared.activity.guard();

    let session = {
        let _registration = shared
            .registry
            .enter(id, session.cancel_flag(), session.roots());

        let scanner = Arc::clone(&shared.scanner);
        let mut session = session;
        let scanned = tokio::task::spawn_blocking(move || {
            session.scan(scanner.as_ref());
            session
        })
        .await;

        match scanned {
            Ok(session) => session,
            Err(e) => {
                error!(session = %id, error = %e, "scan task did not complete");
                return;
            }
        }
    };

    match route {
        ScanRoute::ReturnToCaller(tx) => {
            if tx.send(session).is_err() {
                debug!(session = %id, "blocked caller went away; dropping scanned session");
            }
        }
        ScanRoute::Fire => route_scanned(shared, session),
    }
}

/// Forward a scanned session to preprocessing or to its scheduling context.
fn route_scanned(shared: &Arc<Shared>, session: RefreshSession) {
    let id = session.id();

    if session.is_asynchronous() && shared.config.async_preprocessing {
        if let Err(e) = shared.submit_preprocess(PreprocessJob::first(shared, session)) {
            log_rejection(&e, id);
        }
        return;
    }

    let context = session.context();
    let fire_shared = Arc::clone(shared);
    let scheduled = shared
        .scheduler
        .schedule(context, Box::new(move || fire_direct(&fire_shared, session)));
    if let Err(e) = scheduled {
        log_rejection(&e, id);
    }
}
