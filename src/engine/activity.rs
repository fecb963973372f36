// src/engine/activity.rs

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

/// External "refresh in progress" indicator.
pub trait ProgressIndicator: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Indicator that only logs transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressIndicator for LogProgress {
    fn start(&self) {
        info!("refresh activity started");
    }

    fn stop(&self) {
        info!("refresh activity finished");
    }
}

/// Counts in-flight scan and preprocess operations and drives a
/// [`ProgressIndicator`] on the idle/busy edges.
///
/// The indicator is called while the count lock is held, so start and stop
/// notifications never interleave out of order.
pub struct ActivityTracker {
    busy: Mutex<usize>,
    indicator: Arc<dyn ProgressIndicator>,
}

impl fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("busy", &*self.busy.lock())
            .finish_non_exhaustive()
    }
}

impl ActivityTracker {
    pub fn new(indicator: Arc<dyn ProgressIndicator>) -> Self {
        Self {
            busy: Mutex::new(0),
            indicator,
        }
    }

    pub fn start(&self) {
        let mut busy = self.busy.lock();
        *busy += 1;
        if *busy == 1 {
            self.indicator.start();
        }
    }

    /// An unmatched stop is logged and ignored.
    pub fn stop(&self) {
        let mut busy = self.busy.lock();
        if *busy == 0 {
            warn!("activity stop without matching start");
            return;
        }
        *busy -= 1;
        if *busy == 0 {
            self.indicator.stop();
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock() > 0
    }

    /// Start an operation that ends when the guard is dropped.
    pub fn guard(self: &Arc<Self>) -> ActivityGuard {
        self.start();
        ActivityGuard(Arc::clone(self))
    }
}

pub struct ActivityGuard(Arc<ActivityTracker>);

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl ProgressIndicator for Counting {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn indicator_fires_only_on_edges() {
        let counting = Arc::new(Counting::default());
        let tracker = Arc::new(ActivityTracker::new(counting.clone()));

        let a = tracker.guard();
        let b = tracker.guard();
        assert!(tracker.is_busy());
        drop(a);
        assert_eq!(counting.stops.load(Ordering::SeqCst), 0);
        drop(b);
        assert!(!tracker.is_busy());

        let _c = tracker.guard();
        assert_eq!(counting.starts.load(Ordering::SeqCst), 2);
        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmatched_stop_is_ignored() {
        let counting = Arc::new(Counting::default());
        let tracker = ActivityTracker::new(counting.clone());
        tracker.stop();
        tracker.start();
        assert!(tracker.is_busy());
        assert_eq!(counting.stops.load(Ordering::SeqCst), 0);
    }
}
