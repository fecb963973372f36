// tests/cancellation.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use fsrefresh::engine::{CancelFlag, FinishCallback};
use fsrefresh::errors::{RefreshError, RejectReason};
use fsrefresh::event::ChangeEvent;
use fsrefresh::types::{Modality, SessionId};
use fsrefresh_test_utils::builders::QueueHarnessBuilder;
use fsrefresh_test_utils::{init_tracing, test_runtime, wait_until};

fn counting_finish(counter: &Arc<AtomicUsize>) -> Option<FinishCallback> {
    let c = Arc::clone(counter);
    Some(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }))
}

#[test]
fn cancel_reaches_the_scanning_session_only() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.scanner.hold();

    let finished = Arc::new(AtomicUsize::new(0));
    let mut session = h
        .queue
        .create_session(true, true, counting_finish(&finished), Modality::NonModal);
    session.add_root("/r");
    let id = session.id();
    h.queue.execute(session).unwrap();

    assert!(wait_until(|| h.queue.registry().contains(id)));
    assert!(h.queue.is_refresh_in_progress());
    assert!(!h.queue.cancel_session(SessionId(id.0 + 100)));
    assert!(h.queue.cancel_session(id));

    // The held scan notices the flag, returns, and the session still fires.
    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 1));
    assert_eq!(h.scanner.cancelled_seen(), 1);
    assert!(!h.queue.is_refresh_in_progress());
}

#[test]
fn dispose_cancels_every_registered_session() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());

    let flags: Vec<_> = (0..5).map(|_| CancelFlag::new()).collect();
    for (i, flag) in flags.iter().enumerate() {
        h.queue
            .registry()
            .register(SessionId(1000 + i as u64), flag.clone(), vec![]);
    }
    assert_eq!(h.queue.registry().len(), 5);

    h.queue.dispose();

    assert!(flags.iter().all(CancelFlag::is_cancelled));
    assert!(h.queue.registry().is_empty());
    assert!(!h.queue.is_refresh_in_progress());
    assert!(h.queue.is_disposed());
}

#[test]
fn dispose_releases_a_blocked_caller() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.scanner.hold();

    let queue = Arc::clone(&h.queue);
    let caller = thread::spawn(move || queue.refresh(false, true, None, ["/r"]));

    assert!(wait_until(|| h.queue.is_refresh_in_progress()));
    h.queue.dispose();

    assert!(caller.join().unwrap().is_ok());
    assert_eq!(h.scanner.cancelled_seen(), 1);
    assert!(h.queue.registry().is_empty());
}

#[test]
fn submissions_after_dispose_are_rejected_quietly() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.queue.dispose();
    h.queue.dispose();

    let finished = Arc::new(AtomicUsize::new(0));
    let err = h
        .queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap_err();
    assert!(matches!(err, RefreshError::Disposed));
    assert!(err.is_rejection());

    h.queue.process_single_event(ChangeEvent::delete("/r/x"));
    assert_eq!(h.scanner.calls(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[test]
fn full_scan_queue_rejects_new_sessions() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().scan_capacity(1).build(rt.handle());
    h.scanner.hold();

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, false, counting_finish(&finished), ["/a"])
        .unwrap();
    assert!(wait_until(|| h.scanner.calls() == 1));

    // One slot: the second session waits in the queue, the third bounces.
    h.queue
        .refresh(true, false, counting_finish(&finished), ["/b"])
        .unwrap();
    let err = h
        .queue
        .refresh(true, false, counting_finish(&finished), ["/c"])
        .unwrap_err();
    assert!(matches!(
        err,
        RefreshError::Rejected {
            reason: RejectReason::Full,
            ..
        }
    ));

    h.scanner.release();
    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 2));
    assert_eq!(h.scanner.calls(), 2);
}
