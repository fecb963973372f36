// src/engine/session.rs

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::engine::core::SessionStage;
use crate::event::ChangeEvent;
use crate::snapshot::{ScanRequest, Scanner};
use crate::types::{Modality, SessionId};

/// Shared, sticky cancellation signal for one session.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Runs once, in the session's scheduling context, after its events fired.
pub type FinishCallback = Box<dyn FnOnce() + Send + 'static>;

/// One unit of refresh work: a set of roots to scan, the events the scan
/// produced, and how and where those events are fired.
pub struct RefreshSession {
    id: SessionId,
    asynchronous: bool,
    recursive: bool,
    roots: Vec<PathBuf>,
    events: Vec<ChangeEvent>,
    context: Modality,
    finish: Option<FinishCallback>,
    cancel: CancelFlag,
    stage: SessionStage,
    /// Signalled once the session is done. Dropping it releases any waiter.
    completion: Option<oneshot::Sender<()>>,
}

impl fmt::Debug for RefreshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshSession")
            .field("id", &self.id)
            .field("asynchronous", &self.asynchronous)
            .field("recursive", &self.recursive)
            .field("roots", &self.roots)
            .field("events", &self.events.len())
            .field("context", &self.context)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl RefreshSession {
    pub(crate) fn new(
        id: SessionId,
        asynchronous: bool,
        recursive: bool,
        finish: Option<FinishCallback>,
        context: Modality,
    ) -> Self {
        Self {
            id,
            asynchronous,
            recursive,
            roots: Vec::new(),
            events: Vec::new(),
            context,
            finish,
            cancel: CancelFlag::new(),
            stage: SessionStage::Created,
            completion: None,
        }
    }

    /// An unregistered asynchronous session carrying one pre-detected event
    /// and nothing to scan.
    pub(crate) fn single_event(event: ChangeEvent, context: Modality) -> Self {
        let mut session = Self::new(SessionId::UNREGISTERED, true, false, None, context);
        session.events.push(event);
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn context(&self) -> Modality {
        self.context
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Add a root to scan. Duplicates are ignored; order is preserved.
    /// Roots can only be added before the session is executed.
    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        if self.stage != SessionStage::Created {
            warn!(session = %self.id, root = %root.display(), "root added after execution started; ignoring");
            return;
        }
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
    }

    pub fn add_roots<I, P>(&mut self, roots: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for root in roots {
            self.add_root(root);
        }
    }

    pub(crate) fn set_completion(&mut self, tx: oneshot::Sender<()>) {
        self.completion = Some(tx);
    }

    pub(crate) fn advance(&mut self, next: SessionStage) {
        if !self.stage.can_advance_to(next) {
            error!(session = %self.id, from = ?self.stage, to = ?next, "illegal session transition");
            debug_assert!(false, "illegal session transition {:?} -> {:?}", self.stage, next);
        }
        self.stage = next;
    }

    /// Walk the roots and append what the scanner found.
    ///
    /// Scanner failures (errors or panics) are logged and leave the session
    /// with whatever events it already had. A session with no roots skips
    /// the scanner entirely.
    pub(crate) fn scan(&mut self, scanner: &dyn Scanner) {
        self.advance(SessionStage::Scanning);

        if !self.roots.is_empty() && !self.is_cancelled() {
            let request = ScanRequest {
                roots: &self.roots,
                recursive: self.recursive,
                cancel: &self.cancel,
            };
            match panic::catch_unwind(AssertUnwindSafe(|| scanner.scan(&request))) {
                Ok(Ok(found)) => {
                    debug!(session = %self.id, events = found.len(), "scan finished");
                    self.events.extend(found);
                }
                Ok(Err(e)) => {
                    warn!(session = %self.id, error = %e, "scan failed; firing without its events");
                }
                Err(_) => {
                    error!(session = %self.id, "scanner panicked; firing without its events");
                }
            }
        }

        self.advance(SessionStage::Scanned);
    }

    pub(crate) fn take_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Mark the session done: run the finish callback, then release waiters.
    pub(crate) fn complete(mut self) {
        self.advance(SessionStage::Done);
        if let Some(finish) = self.finish.take() {
            if panic::catch_unwind(AssertUnwindSafe(finish)).is_err() {
                error!(session = %self.id, "finish callback panicked");
            }
        }
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(());
        }
        debug!(session = %self.id, "session done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(Vec<ChangeEvent>);

    impl Scanner for Fixed {
        fn scan(&self, _request: &ScanRequest<'_>) -> anyhow::Result<Vec<ChangeEvent>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl Scanner for Failing {
        fn scan(&self, _request: &ScanRequest<'_>) -> anyhow::Result<Vec<ChangeEvent>> {
            Err(anyhow!("disk on fire"))
        }
    }

    fn session() -> RefreshSession {
        RefreshSession::new(SessionId(1), true, true, None, Modality::NonModal)
    }

    #[test]
    fn roots_are_deduplicated_in_order() {
        let mut s = session();
        s.add_roots(["/b", "/a", "/b"]);
        assert_eq!(s.roots(), &[PathBuf::from("/b"), PathBuf::from("/a")]);
    }

    #[test]
    fn roots_cannot_be_added_after_scan() {
        let mut s = session();
        s.add_root("/a");
        s.scan(&Fixed(vec![]));
        s.add_root("/late");
        assert_eq!(s.roots().len(), 1);
        assert_eq!(s.stage(), SessionStage::Scanned);
    }

    #[test]
    fn failing_scanner_leaves_session_scanned_and_empty() {
        let mut s = session();
        s.add_root("/a");
        s.scan(&Failing);
        assert!(s.events().is_empty());
        assert!(s.stage().is_scanned());
    }

    #[test]
    fn single_event_session_keeps_its_event() {
        let mut s = RefreshSession::single_event(ChangeEvent::delete("/x"), Modality::Any);
        assert_eq!(s.id(), SessionId::UNREGISTERED);
        s.scan(&Fixed(vec![ChangeEvent::delete("/other")]));
        assert_eq!(s.events(), &[ChangeEvent::delete("/x")]);
    }

    #[test]
    fn completion_runs_finish_then_signals() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let mut s = RefreshSession::new(
            SessionId(2),
            false,
            false,
            Some(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })),
            Modality::NonModal,
        );
        let (tx, mut rx) = oneshot::channel();
        s.set_completion(tx);
        s.scan(&Fixed(vec![]));
        s.advance(SessionStage::Committing { attempt: 0 });
        s.complete();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_ok());
    }
}
