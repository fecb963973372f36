// src/engine/queue.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::access::{FireScheduler, GenerationCounter, ModelAccess};
use crate::config::QueueSection;
use crate::engine::activity::{ActivityTracker, ProgressIndicator};
use crate::engine::core::{choose_path, AccessProbe, ExecutionPath};
use crate::engine::fire::{fire_direct, fire_inline, RefreshObserver};
use crate::engine::preprocessor::{spawn_preprocessor, PreprocessJob};
use crate::engine::registry::SessionRegistry;
use crate::engine::scan_worker::{spawn_scan_worker, ScanJob, ScanRoute};
use crate::engine::session::{FinishCallback, RefreshSession};
use crate::errors::{RefreshError, RejectReason, Result};
use crate::event::{ChangeEvent, ListenerRegistry};
use crate::snapshot::{Scanner, Snapshot};
use crate::types::{Modality, SessionId};

/// Everything the queue depends on but does not own the policy of.
pub struct Collaborators {
    pub scanner: Arc<dyn Scanner>,
    pub snapshot: Arc<dyn Snapshot>,
    pub listeners: Arc<dyn ListenerRegistry>,
    pub scheduler: Arc<dyn FireScheduler>,
    pub access: Arc<dyn ModelAccess>,
    /// Must be the counter the write lock advances.
    pub generation: GenerationCounter,
    pub progress: Arc<dyn ProgressIndicator>,
    pub observers: Vec<Arc<dyn RefreshObserver>>,
}

/// State shared between the queue handle, its workers, and scheduled fires.
pub(crate) struct Shared {
    pub(crate) config: QueueSection,
    pub(crate) registry: SessionRegistry,
    pub(crate) activity: Arc<ActivityTracker>,
    pub(crate) generation: GenerationCounter,
    pub(crate) scanner: Arc<dyn Scanner>,
    pub(crate) snapshot: Arc<dyn Snapshot>,
    pub(crate) listeners: Arc<dyn ListenerRegistry>,
    pub(crate) scheduler: Arc<dyn FireScheduler>,
    pub(crate) access: Arc<dyn ModelAccess>,
    pub(crate) observers: Vec<Arc<dyn RefreshObserver>>,
    scan_tx: Mutex<Option<mpsc::Sender<ScanJob>>>,
    preprocess_tx: Mutex<Option<mpsc::Sender<PreprocessJob>>>,
    disposed: AtomicBool,
}

impl Shared {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn submit_scan(&self, job: ScanJob) -> Result<()> {
        if self.is_disposed() {
            return Err(RefreshError::Disposed);
        }
        try_submit(&self.scan_tx, "scan queue", job)
    }

    pub(crate) fn submit_preprocess(&self, job: PreprocessJob) -> Result<()> {
        if self.is_disposed() {
            return Err(RefreshError::Disposed);
        }
        try_submit(&self.preprocess_tx, "preprocess queue", job)
    }
}

fn try_submit<T>(slot: &Mutex<Option<mpsc::Sender<T>>>, queue: &'static str, job: T) -> Result<()> {
    let guard = slot.lock();
    let Some(tx) = guard.as_ref() else {
        return Err(RefreshError::rejected(queue, RejectReason::Closed));
    };
    tx.try_send(job).map_err(|e| match e {
        TrySendError::Full(_) => RefreshError::rejected(queue, RejectReason::Full),
        TrySendError::Closed(_) => RefreshError::rejected(queue, RejectReason::Closed),
    })
}

/// Log a failed hand-off. Shutdown-time rejections are expected and stay
/// quiet; a full queue is worth a warning.
pub(crate) fn log_rejection(err: &RefreshError, session: SessionId) {
    match err {
        RefreshError::Rejected {
            reason: RejectReason::Full,
            ..
        } => warn!(%session, error = %err, "refresh work rejected"),
        e if e.is_rejection() => debug!(%session, error = %err, "refresh work rejected"),
        _ => error!(%session, error = %err, "refresh work failed"),
    }
}

/// Accepts refresh sessions and drives them through scan, optional
/// preprocessing and fire.
///
/// - Asynchronous sessions are queued and return immediately.
/// - Synchronous sessions either run inline (caller holds write access),
///   are refused (caller holds read access off the dispatch thread), or
///   are queued while the caller blocks until they fired.
///
/// Queued scans run one at a time. A blocking call made from a task on a
/// multi-thread runtime moves that worker aside while it waits; from a
/// current-thread runtime it is refused.
///
/// Dropping the queue disposes it.
pub struct RefreshQueue {
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl fmt::Debug for RefreshQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshQueue")
            .field("config", &self.shared.config)
            .field("registered", &self.shared.registry.len())
            .field("disposed", &self.shared.is_disposed())
            .finish_non_exhaustive()
    }
}

impl RefreshQueue {
    /// Create the queue and start its scan worker and preprocessor on
    /// `handle`.
    pub fn start(handle: &Handle, config: QueueSection, collaborators: Collaborators) -> Self {
        let (scan_tx, scan_rx) = mpsc::channel(config.scan_capacity);
        let (preprocess_tx, preprocess_rx) = mpsc::channel(config.preprocess_capacity);

        let Collaborators {
            scanner,
            snapshot,
            listeners,
            scheduler,
            access,
            generation,
            progress,
            observers,
        } = collaborators;

        let shared = Arc::new(Shared {
            config: config.clone(),
            registry: SessionRegistry::new(),
            activity: Arc::new(ActivityTracker::new(progress)),
            generation,
            scanner,
            snapshot,
            listeners,
            scheduler,
            access,
            observers,
            scan_tx: Mutex::new(Some(scan_tx)),
            preprocess_tx: Mutex::new(Some(preprocess_tx)),
            disposed: AtomicBool::new(false),
        });

        spawn_scan_worker(handle, Arc::clone(&shared), scan_rx);
        spawn_preprocessor(handle, Arc::clone(&shared), preprocess_rx);

        info!(
            scan_capacity = config.scan_capacity,
            preprocess_capacity = config.preprocess_capacity,
            async_preprocessing = config.async_preprocessing,
            "refresh queue started"
        );

        Self {
            shared,
            next_id: AtomicU64::new(1),
        }
    }

    /// New empty session with a fresh nonzero id.
    pub fn create_session(
        &self,
        asynchronous: bool,
        recursive: bool,
        finish: Option<FinishCallback>,
        context: Modality,
    ) -> RefreshSession {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        RefreshSession::new(id, asynchronous, recursive, finish, context)
    }

    /// Run a session along the path its mode and the caller's access allow.
    ///
    /// Returns once the session is queued (asynchronous) or once it has
    /// fired (synchronous). Fails with [`RefreshError::DeadlockHazard`] if
    /// the caller holds read access off the dispatch thread, and with a
    /// rejection if the queue did not take the session.
    pub fn execute(&self, session: RefreshSession) -> Result<()> {
        let probe = AccessProbe {
            holds_write: self.shared.access.holds_write_access(),
            holds_read: self.shared.access.holds_read_access(),
            is_dispatch_thread: self.shared.access.is_dispatch_thread(),
        };
        let path = choose_path(session.is_asynchronous(), probe);
        debug!(session = %session.id(), ?path, ?probe, "executing refresh session");

        match path {
            ExecutionPath::Enqueue => self.enqueue(session, ScanRoute::Fire),
            ExecutionPath::Inline => {
                self.run_inline(session);
                Ok(())
            }
            ExecutionPath::Refuse => {
                error!(
                    session = %session.id(),
                    "synchronous refresh under read access off the dispatch thread would deadlock"
                );
                Err(RefreshError::DeadlockHazard)
            }
            ExecutionPath::EnqueueAndWait => self.run_and_wait(session, probe.is_dispatch_thread),
        }
    }

    /// Create, fill and execute a session in the default context.
    pub fn refresh<I, P>(
        &self,
        asynchronous: bool,
        recursive: bool,
        finish: Option<FinishCallback>,
        roots: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut session = self.create_session(asynchronous, recursive, finish, Modality::default());
        session.add_roots(roots);
        self.execute(session)
    }

    /// Queue one pre-detected event for firing without a scan.
    ///
    /// The session is never registered, so it cannot be cancelled by id.
    pub fn process_single_event(&self, event: ChangeEvent) {
        let session = RefreshSession::single_event(event, self.shared.config.single_event_modality);
        if let Err(e) = self.enqueue(session, ScanRoute::Fire) {
            debug!(error = %e, "single event not queued");
        }
    }

    /// Signal cancellation to a scanning session. Returns whether it was
    /// registered.
    pub fn cancel_session(&self, id: SessionId) -> bool {
        let found = self.shared.registry.cancel(id);
        debug!(session = %id, found, "cancel requested");
        found
    }

    /// Whether any session is currently scanning.
    pub fn is_refresh_in_progress(&self) -> bool {
        !self.shared.registry.is_empty()
    }

    /// Whether any scan or preprocessing round is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.activity.is_busy()
    }

    /// Sessions currently scanning.
    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    /// Counter of started write actions, checked by preprocessing commits.
    pub fn generation(&self) -> &GenerationCounter {
        &self.shared.generation
    }

    /// Cancel every scanning session and stop accepting work. Sessions that
    /// have not started scanning or preprocessing are dropped; their waiters
    /// are released without their finish callbacks. Fires that were already
    /// scheduled still run. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.shared.registry.cancel_all();
        self.shared.scan_tx.lock().take();
        self.shared.preprocess_tx.lock().take();
        info!(cancelled, "refresh queue disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    fn enqueue(&self, session: RefreshSession, route: ScanRoute) -> Result<()> {
        let id = session.id();
        self.shared
            .submit_scan(ScanJob { session, route })
            .inspect_err(|e| log_rejection(e, id))
    }

    /// Scan and fire on the calling thread, which holds write access.
    fn run_inline(&self, mut session: RefreshSession) {
        {
            let _registration =
                self.shared
                    .registry
                    .enter(session.id(), session.cancel_flag(), session.roots());
            session.scan(self.shared.scanner.as_ref());
        }
        fire_inline(&self.shared, session);
    }

    fn run_and_wait(&self, mut session: RefreshSession, on_dispatch: bool) -> Result<()> {
        let id = session.id();
        ensure_can_block(id)?;

        if on_dispatch {
            // The fire would be scheduled on this very thread; take the
            // scanned session back and fire it here instead.
            let (tx, rx) = oneshot::channel();
            self.enqueue(session, ScanRoute::ReturnToCaller(tx))?;
            match wait_blocking(rx) {
                Ok(session) => fire_direct(&self.shared, session),
                Err(_) => debug!(session = %id, "session dropped before its scan completed"),
            }
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        session.set_completion(tx);
        self.enqueue(session, ScanRoute::Fire)?;
        if wait_blocking(rx).is_err() {
            debug!(session = %id, "session dropped before it fired");
        }
        Ok(())
    }
}

/// A current-thread runtime has no worker to hand off, so the caller cannot block.
fn ensure_can_block(session: SessionId) -> Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            error!(%session, "synchronous refresh called from a current-thread runtime");
            Err(RefreshError::BlockingInRuntime)
        }
        _ => Ok(()),
    }
}

fn wait_blocking<T>(rx: oneshot::Receiver<T>) -> std::result::Result<T, oneshot::error::RecvError> {
    if Handle::try_current().is_ok() {
        tokio::task::block_in_place(|| rx.blocking_recv())
    } else {
        rx.blocking_recv()
    }
}

impl Drop for RefreshQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}
