// tests/queue_ordering.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fsrefresh::engine::FinishCallback;
use fsrefresh::event::{ChangeEvent, FileStamp};
use fsrefresh::types::Modality;
use fsrefresh_test_utils::builders::QueueHarnessBuilder;
use fsrefresh_test_utils::{init_tracing, test_runtime, wait_until};

fn counting_finish(counter: &Arc<AtomicUsize>) -> Option<FinishCallback> {
    let c = Arc::clone(counter);
    Some(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }))
}

#[test]
fn queued_scans_never_overlap_and_keep_submission_order() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.scanner.set_delay(Duration::from_millis(20));

    let finished = Arc::new(AtomicUsize::new(0));
    for root in ["/a", "/b", "/c", "/d"] {
        h.queue
            .refresh(true, false, counting_finish(&finished), [root])
            .unwrap();
    }

    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 4));
    assert_eq!(h.scanner.max_concurrent(), 1);

    let scans: Vec<_> = h
        .recorder
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("scan-"))
        .collect();
    assert_eq!(
        scans,
        vec![
            "scan-start /a", "scan-end /a", "scan-start /b", "scan-end /b",
            "scan-start /c", "scan-end /c", "scan-start /d", "scan-end /d",
        ]
    );
}

#[test]
fn events_fire_after_scan_inside_observer_brackets() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.snapshot.insert("/r/old.txt", false, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![
            ChangeEvent::create("/r", "new.txt", false, FileStamp::default()),
            ChangeEvent::delete("/r/old.txt"),
        ],
    );

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap();
    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 1));

    let r = &h.recorder;
    let scan_end = r.position("scan-end /r").unwrap();
    let start = r.position("refresh-start async=true").unwrap();
    let before = r.position("before-change").unwrap();
    let after = r.position("after-change").unwrap();
    let finish = r.position("refresh-finish async=true").unwrap();
    assert!(scan_end < start);
    assert!(start < before && before < after && after < finish);

    assert_eq!(h.listener.batches().len(), 1);
    assert_eq!(h.listener.batches()[0].len(), 2);
}

#[test]
fn finish_runs_exactly_once_per_session() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![ChangeEvent::create("/r", "a.txt", false, FileStamp::default())],
    );

    let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (i, counter) in counters.iter().enumerate() {
        // Mix asynchronous and blocking sessions.
        let asynchronous = i != 1;
        h.queue
            .refresh(asynchronous, true, counting_finish(counter), ["/r"])
            .unwrap();
    }

    assert!(wait_until(|| counters.iter().all(|c| c.load(Ordering::SeqCst) >= 1)));
    std::thread::sleep(Duration::from_millis(50));
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
}

#[test]
fn stale_events_are_dropped_before_listeners_see_them() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![ChangeEvent::content_change("/r/vanished.txt", FileStamp::default())],
    );

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap();

    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 1));
    assert_eq!(h.listener.prepared(), 0);
    assert_eq!(h.listener.applied(), 0);
}

#[test]
fn preprocessing_computes_appliers_before_the_write_action() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new().build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![ChangeEvent::create("/r", "a.txt", false, FileStamp::default())],
    );

    let finished = Arc::new(AtomicUsize::new(0));
    h.queue
        .refresh(true, true, counting_finish(&finished), ["/r"])
        .unwrap();
    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 1));

    let prepare = h.recorder.position("prepare").unwrap();
    let start = h.recorder.position("refresh-start async=true").unwrap();
    assert!(prepare < start);
}

#[test]
fn without_preprocessing_listeners_run_inside_the_write_action() {
    init_tracing();
    let rt = test_runtime();
    let h = QueueHarnessBuilder::new()
        .async_preprocessing(false)
        .build(rt.handle());
    h.snapshot.insert("/r", true, FileStamp::default());
    h.scanner.script(
        "/r",
        vec![ChangeEvent::create("/r", "a.txt", false, FileStamp::default())],
    );

    let finished = Arc::new(AtomicUsize::new(0));
    let mut session = h
        .queue
        .create_session(true, true, counting_finish(&finished), Modality::Any);
    session.add_root("/r");
    h.queue.execute(session).unwrap();
    assert!(wait_until(|| finished.load(Ordering::SeqCst) == 1));

    let start = h.recorder.position("refresh-start async=true").unwrap();
    let prepare = h.recorder.position("prepare").unwrap();
    let finish = h.recorder.position("refresh-finish async=true").unwrap();
    assert!(start < prepare && prepare < finish);
    assert_eq!(h.access.writes(), 1);
}
