// tests/preprocess_retry.rs

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fsrefresh::engine::FinishCallback;
use fsrefresh::event::{ChangeEvent, FileStamp};
use fsrefresh_test_utils::builders::{QueueHarness, QueueHarnessBuilder};
use fsrefresh_test_utils::fakes::ManualScheduler;
use fsrefresh_test_utils::{init_tracing, test_runtime, wait_until};

fn counting_finish(counter: &Arc<AtomicUsize>) -> Option<FinishCallback> {
    let c = Arc::clone(counter);
    Some(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }))
}

fn manual_harness(rt: &tokio::runtime::Runtime) -> (QueueHarness, Arc<ManualScheduler>) {
    let scheduler = Arc::new(ManualScheduler::new());
    let h = QueueHarnessBuilder::new()
        .scheduler(scheduler.clone())
        .build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![ChangeEvent::create("/r", "a.txt", false, FileStamp::default())],
    );
    (h, scheduler)
}

#[test]
fn unchanged_generation_applies_precomputed_appliers() {
    init_tracing();
    let rt = test_runtime();
    let (h, scheduler) = manual_harness(&rt);

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap();

    assert!(wait_until(|| scheduler.pending() == 1));
    assert_eq!(h.listener.prepared(), 1);
    assert_eq!(h.listener.applied(), 0);

    assert!(scheduler.run_next());
    assert_eq!(h.listener.prepared(), 1);
    assert_eq!(h.listener.applied(), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(h.snapshot.get(Path::new("/r/a.txt")).is_some());
}

#[test]
fn write_between_preprocess_and_commit_forces_another_round() {
    init_tracing();
    let rt = test_runtime();
    let (h, scheduler) = manual_harness(&rt);

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap();
    assert!(wait_until(|| scheduler.pending() == 1));

    // Some unrelated write action starts before the commit gets to run.
    h.access.generation().advance();

    // The stale commit discards its appliers and goes back to the
    // preprocessor instead of applying.
    assert!(scheduler.run_next());
    assert_eq!(h.listener.applied(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(h.access.writes(), 0);

    assert!(wait_until(|| scheduler.pending() == 1));
    assert_eq!(h.listener.prepared(), 2);

    assert!(scheduler.run_next());
    assert_eq!(h.listener.applied(), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(h.access.writes(), 1);
    assert!(h.snapshot.get(Path::new("/r/a.txt")).is_some());
}

#[test]
fn competing_session_commit_makes_earlier_batch_stale() {
    init_tracing();
    let rt = test_runtime();
    let (h, scheduler) = manual_harness(&rt);
    h.snapshot.insert("/s", true, FileStamp::default());
    h.scanner.script(
        "/s",
        vec![ChangeEvent::create("/s", "b.txt", false, FileStamp::default())],
    );

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&first), ["/r"])
        .unwrap();
    h.queue
        .refresh(true, true, counting_finish(&second), ["/s"])
        .unwrap();
    assert!(wait_until(|| scheduler.pending() == 2));

    // Both rounds were prepared at the same generation; the first commit
    // opens a write action, so the second must be recomputed.
    assert!(scheduler.run_next());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert!(scheduler.run_next());
    assert_eq!(second.load(Ordering::SeqCst), 0);

    assert!(wait_until(|| scheduler.pending() == 1));
    assert!(scheduler.run_next());
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(h.listener.prepared(), 3);
    assert_eq!(h.listener.applied(), 2);
    assert!(h.snapshot.get(Path::new("/s/b.txt")).is_some());
}
