// src/access/lock.rs

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{error, trace};

use crate::access::GenerationCounter;
use crate::errors::{RefreshError, Result};

/// What the refresh queue needs to know about the caller's access mode, and
/// how it enters exclusive mode to apply events.
pub trait ModelAccess: Send + Sync {
    /// Whether the calling thread is inside a write action.
    fn holds_write_access(&self) -> bool;

    /// Whether the calling thread is inside a read action.
    fn holds_read_access(&self) -> bool;

    /// Whether the calling thread is the privileged dispatch thread.
    fn is_dispatch_thread(&self) -> bool;

    /// Run `action` inside a write action.
    fn run_write(&self, action: &mut dyn FnMut()) -> Result<()>;
}

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Per-thread read/write depth, keyed by lock id.
    static HELD: RefCell<HashMap<usize, Held>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, Default)]
struct Held {
    read: u32,
    write: u32,
}

#[derive(Clone, Copy)]
enum Mode {
    Read,
    Write,
}

/// Restores the thread-local depth on every exit path, including unwinding.
struct DepthGuard {
    lock_id: usize,
    mode: Mode,
}

impl DepthGuard {
    fn enter(lock_id: usize, mode: Mode) -> Self {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            let entry = held.entry(lock_id).or_default();
            match mode {
                Mode::Read => entry.read += 1,
                Mode::Write => entry.write += 1,
            }
        });
        Self { lock_id, mode }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(entry) = held.get_mut(&self.lock_id) {
                match self.mode {
                    Mode::Read => entry.read = entry.read.saturating_sub(1),
                    Mode::Write => entry.write = entry.write.saturating_sub(1),
                }
                if entry.read == 0 && entry.write == 0 {
                    held.remove(&self.lock_id);
                }
            }
        });
    }
}

/// Process-wide read/write access lock for the snapshot model.
///
/// Semantics:
/// - Once a dispatch thread is bound, only it may start write actions. Its
///   read actions take no lock, since no one else can write.
/// - Other threads take a shared read guard for read actions.
/// - Without a bound dispatch thread any thread may write, but a thread that
///   holds a shared read cannot start a write ([`RefreshError::LockUpgrade`]).
/// - Read inside write and write inside write are reentrant.
/// - Each outermost write action start advances the generation counter.
pub struct ModelLock {
    id: usize,
    lock: RwLock<()>,
    generation: GenerationCounter,
    dispatch: Mutex<Option<ThreadId>>,
}

impl fmt::Debug for ModelLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLock")
            .field("id", &self.id)
            .field("generation", &self.generation.current())
            .field("dispatch", &*self.dispatch.lock())
            .finish()
    }
}

impl ModelLock {
    pub fn new(generation: GenerationCounter) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            lock: RwLock::new(()),
            generation,
            dispatch: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> &GenerationCounter {
        &self.generation
    }

    /// Designate `thread` as the dispatch thread. Returns false if another
    /// thread is already bound.
    pub fn bind_dispatch_thread(&self, thread: ThreadId) -> bool {
        let mut bound = self.dispatch.lock();
        match *bound {
            Some(existing) if existing != thread => false,
            _ => {
                *bound = Some(thread);
                true
            }
        }
    }

    pub fn unbind_dispatch_thread(&self, thread: ThreadId) {
        let mut bound = self.dispatch.lock();
        if *bound == Some(thread) {
            *bound = None;
        }
    }

    fn held(&self) -> Held {
        HELD.with(|held| held.borrow().get(&self.id).copied().unwrap_or_default())
    }

    fn dispatch_state(&self) -> (bool, bool) {
        let bound = *self.dispatch.lock();
        let is_bound = bound.is_some();
        let on_dispatch = bound == Some(thread::current().id());
        (is_bound, on_dispatch)
    }

    /// Run `f` inside a read action.
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> R {
        let held = self.held();
        let (is_bound, on_dispatch) = self.dispatch_state();

        if held.write > 0 || held.read > 0 || (is_bound && on_dispatch) {
            let _depth = DepthGuard::enter(self.id, Mode::Read);
            return f();
        }

        let _guard = self.lock.read_recursive();
        let _depth = DepthGuard::enter(self.id, Mode::Read);
        f()
    }

    /// Run `f` inside a write action.
    pub fn write<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let held = self.held();
        if held.write > 0 {
            let _depth = DepthGuard::enter(self.id, Mode::Write);
            return Ok(f());
        }

        let (is_bound, on_dispatch) = self.dispatch_state();
        if is_bound && !on_dispatch {
            return Err(RefreshError::WriteOffDispatch);
        }
        if held.read > 0 && !on_dispatch {
            return Err(RefreshError::LockUpgrade);
        }

        let _guard = self.lock.write();
        let generation = self.generation.advance();
        trace!(generation, "write action started");
        let _depth = DepthGuard::enter(self.id, Mode::Write);
        Ok(f())
    }
}

impl ModelAccess for ModelLock {
    fn holds_write_access(&self) -> bool {
        self.held().write > 0
    }

    fn holds_read_access(&self) -> bool {
        self.held().read > 0
    }

    fn is_dispatch_thread(&self) -> bool {
        self.dispatch_state().1
    }

    fn run_write(&self, action: &mut dyn FnMut()) -> Result<()> {
        self.write(action).inspect_err(|e| error!(error = %e, "write action refused"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn write_advances_generation_once_per_outermost_action() {
        let lock = ModelLock::new(GenerationCounter::new());
        lock.write(|| {
            assert!(lock.holds_write_access());
            lock.write(|| ()).unwrap();
            lock.read(|| assert!(lock.holds_read_access()));
        })
        .unwrap();
        assert_eq!(lock.generation().current(), 1);
        assert!(!lock.holds_write_access());
    }

    #[test]
    fn write_under_read_is_refused_without_dispatch_thread() {
        let lock = ModelLock::new(GenerationCounter::new());
        let result = lock.read(|| lock.write(|| ()));
        assert!(matches!(result, Err(RefreshError::LockUpgrade)));
        assert_eq!(lock.generation().current(), 0);
    }

    #[test]
    fn only_dispatch_thread_writes_once_bound() {
        let lock = Arc::new(ModelLock::new(GenerationCounter::new()));
        assert!(lock.bind_dispatch_thread(thread::current().id()));
        assert!(lock.is_dispatch_thread());

        // The dispatch thread may write while inside its own read action.
        lock.read(|| lock.write(|| ()).unwrap());

        let other = Arc::clone(&lock);
        let refused = thread::spawn(move || {
            (other.is_dispatch_thread(), other.write(|| ()).is_err())
        })
        .join()
        .unwrap();
        assert_eq!(refused, (false, true));
        assert_eq!(lock.generation().current(), 1);
    }

    #[test]
    fn second_dispatch_binding_is_rejected() {
        let lock = Arc::new(ModelLock::new(GenerationCounter::new()));
        assert!(lock.bind_dispatch_thread(thread::current().id()));
        let other = Arc::clone(&lock);
        let bound = thread::spawn(move || other.bind_dispatch_thread(thread::current().id()))
            .join()
            .unwrap();
        assert!(!bound);
        lock.unbind_dispatch_thread(thread::current().id());
        assert!(!lock.is_dispatch_thread());
    }

    #[test]
    fn depth_is_restored_after_panic() {
        let lock = ModelLock::new(GenerationCounter::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            lock.read(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!lock.holds_read_access());
    }
}
