// src/access/dispatch.rs

//! The privileged dispatch thread.
//!
//! Deferred fires are posted here together with the modality context they
//! were created in. A task only runs while the current modal depth permits
//! its modality; otherwise it is held until enough modal levels have been
//! popped. Tasks run strictly one at a time, in submission order among the
//! tasks that are runnable.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace};

use crate::access::ModelLock;
use crate::errors::{RefreshError, RejectReason, Result};
use crate::types::Modality;

/// A unit of work posted to a scheduling context.
pub type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// Posts deferred work to the context a session captured at creation.
pub trait FireScheduler: Send + Sync {
    fn schedule(&self, modality: Modality, task: Deferred) -> Result<()>;
}

enum DispatchMessage {
    Run { modality: Modality, task: Deferred },
    PushModal,
    PopModal,
    Shutdown,
}

impl fmt::Debug for DispatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMessage::Run { modality, .. } => {
                f.debug_struct("Run").field("modality", modality).finish_non_exhaustive()
            }
            DispatchMessage::PushModal => f.write_str("PushModal"),
            DispatchMessage::PopModal => f.write_str("PopModal"),
            DispatchMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Handle to a named OS thread that drains posted tasks.
pub struct DispatchThread {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    thread_id: ThreadId,
    depth: Arc<AtomicU32>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DispatchThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchThread")
            .field("thread_id", &self.thread_id)
            .field("modal_depth", &self.modal_depth())
            .finish_non_exhaustive()
    }
}

impl DispatchThread {
    /// Start the thread. When `lock` is given the new thread is bound as its
    /// dispatch thread before this returns.
    pub fn start(lock: Option<Arc<ModelLock>>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicU32::new(0));
        let loop_depth = Arc::clone(&depth);
        let loop_lock = lock.clone();

        let join = thread::Builder::new()
            .name("fsrefresh-dispatch".into())
            .spawn(move || dispatch_loop(rx, loop_depth, loop_lock))?;
        let thread_id = join.thread().id();

        if let Some(lock) = &lock {
            if !lock.bind_dispatch_thread(thread_id) {
                let _ = tx.send(DispatchMessage::Shutdown);
                let _ = join.join();
                return Err(RefreshError::ConfigError(
                    "model lock is already bound to another dispatch thread".into(),
                ));
            }
        }

        info!(?thread_id, "dispatch thread started");
        Ok(Self {
            tx,
            thread_id,
            depth,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn modal_depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// Post `task` to run once `modality` is permitted.
    pub fn invoke_later(&self, modality: Modality, task: impl FnOnce() + Send + 'static) -> Result<()> {
        self.send(DispatchMessage::Run {
            modality,
            task: Box::new(task),
        })
    }

    /// Run `f` on the dispatch thread and wait for its result.
    ///
    /// Runs inline when called from the dispatch thread itself. Fails with a
    /// closed rejection if the thread shut down before running `f`.
    pub fn invoke_and_wait<R, F>(&self, modality: Modality, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = oneshot::channel();
        self.invoke_later(modality, move || {
            let _ = tx.send(f());
        })?;
        rx.blocking_recv()
            .map_err(|_| RefreshError::rejected("dispatch", RejectReason::Closed))
    }

    /// Enter one more modal level; tasks created outside it are held.
    pub fn push_modal(&self) -> Result<()> {
        self.send(DispatchMessage::PushModal)
    }

    /// Leave the innermost modal level and release held tasks it now
    /// permits.
    pub fn pop_modal(&self) -> Result<()> {
        self.send(DispatchMessage::PopModal)
    }

    /// Stop the thread after the messages already posted. Held tasks are
    /// dropped. Idempotent.
    pub fn shutdown(&self) {
        let Some(join) = self.join.lock().take() else {
            return;
        };
        let _ = self.tx.send(DispatchMessage::Shutdown);
        if self.is_current() {
            return;
        }
        if join.join().is_err() {
            error!("dispatch thread panicked");
        }
    }

    fn send(&self, message: DispatchMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RefreshError::rejected("dispatch", RejectReason::Closed))
    }
}

impl FireScheduler for DispatchThread {
    fn schedule(&self, modality: Modality, task: Deferred) -> Result<()> {
        self.send(DispatchMessage::Run { modality, task })
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<DispatchMessage>,
    depth: Arc<AtomicU32>,
    lock: Option<Arc<ModelLock>>,
) {
    let mut held: VecDeque<(Modality, Deferred)> = VecDeque::new();

    while let Some(message) = rx.blocking_recv() {
        trace!(?message, "dispatch message");
        match message {
            DispatchMessage::Run { modality, task } => {
                if modality.permits(depth.load(Ordering::Acquire)) {
                    run_task(task);
                } else {
                    debug!(?modality, held = held.len() + 1, "holding task until modal level closes");
                    held.push_back((modality, task));
                }
            }
            DispatchMessage::PushModal => {
                depth.fetch_add(1, Ordering::AcqRel);
            }
            DispatchMessage::PopModal => {
                let current = depth.load(Ordering::Acquire).saturating_sub(1);
                depth.store(current, Ordering::Release);
                release_held(&mut held, current);
            }
            DispatchMessage::Shutdown => break,
        }
    }

    if !held.is_empty() {
        debug!(dropped = held.len(), "dispatch thread stopping with held tasks");
    }
    if let Some(lock) = lock {
        lock.unbind_dispatch_thread(thread::current().id());
    }
    info!("dispatch thread stopped");
}

fn release_held(held: &mut VecDeque<(Modality, Deferred)>, depth: u32) {
    let mut still_held = VecDeque::with_capacity(held.len());
    while let Some((modality, task)) = held.pop_front() {
        if modality.permits(depth) {
            run_task(task);
        } else {
            still_held.push_back((modality, task));
        }
    }
    *held = still_held;
}

fn run_task(task: Deferred) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("dispatch task panicked");
    }
}
