use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use fsrefresh::access::{Deferred, FireScheduler, GenerationCounter, ModelAccess};
use fsrefresh::engine::{CancelFlag, ProgressIndicator, RefreshObserver};
use fsrefresh::errors::Result;
use fsrefresh::event::{AsyncFileListener, ChangeApplier, ChangeEvent};
use fsrefresh::snapshot::{ScanRequest, Scanner};
use fsrefresh::types::Modality;

/// Shared, ordered log of things that happened during a test.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

/// A gate scans can be held at until a test releases them.
#[derive(Debug, Default)]
struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn set(&self, closed: bool) {
        *self.closed.lock() = closed;
        self.cv.notify_all();
    }

    /// Block while closed; a cancelled scan stops waiting.
    fn wait(&self, cancel: &CancelFlag) {
        let mut closed = self.closed.lock();
        while *closed && !cancel.is_cancelled() {
            self.cv.wait_for(&mut closed, Duration::from_millis(5));
        }
    }
}

/// Scanner returning scripted events per root.
///
/// Records `scan-start <roots>` / `scan-end <roots>` in the recorder and
/// tracks how many scans overlap.
#[derive(Debug, Default)]
pub struct ScriptedScanner {
    script: Mutex<HashMap<PathBuf, Vec<ChangeEvent>>>,
    recorder: Recorder,
    gate: Gate,
    delay: Mutex<Duration>,
    fail: AtomicBool,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    cancelled_seen: AtomicUsize,
    threads: Mutex<Vec<ThreadId>>,
}

impl ScriptedScanner {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            ..Self::default()
        }
    }

    /// Events reported whenever `root` is scanned.
    pub fn script(&self, root: impl Into<PathBuf>, events: Vec<ChangeEvent>) {
        self.script.lock().insert(root.into(), events);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every scan until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.set(true);
    }

    pub fn release(&self) {
        self.gate.set(false);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// How many scans observed their cancel flag set before returning.
    pub fn cancelled_seen(&self) -> usize {
        self.cancelled_seen.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }

    pub fn label(roots: &[PathBuf]) -> String {
        roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Scanner for ScriptedScanner {
    fn scan(&self, request: &ScanRequest<'_>) -> anyhow::Result<Vec<ChangeEvent>> {
        let label = Self::label(request.roots);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.threads.lock().push(thread::current().id());
        self.recorder.push(format!("scan-start {label}"));

        self.gate.wait(request.cancel);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = if self.fail.load(Ordering::SeqCst) {
            Err(anyhow!("scripted scan failure"))
        } else {
            let script = self.script.lock();
            Ok(request
                .roots
                .iter()
                .filter_map(|root| script.get(root))
                .flatten()
                .cloned()
                .collect())
        };

        if request.cancel.is_cancelled() {
            self.cancelled_seen.fetch_add(1, Ordering::SeqCst);
        }
        self.recorder.push(format!("scan-end {label}"));
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Access probe with settable flags.
///
/// The flags are global rather than per thread; tests set them right before
/// calling into the queue from the thread under test.
#[derive(Debug, Default)]
pub struct FakeAccess {
    write: AtomicBool,
    read: AtomicBool,
    dispatch: AtomicBool,
    generation: GenerationCounter,
    writes: AtomicUsize,
    write_threads: Mutex<Vec<ThreadId>>,
}

impl FakeAccess {
    pub fn new(generation: GenerationCounter) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn set_write(&self, on: bool) {
        self.write.store(on, Ordering::SeqCst);
    }

    pub fn set_read(&self, on: bool) {
        self.read.store(on, Ordering::SeqCst);
    }

    pub fn set_dispatch(&self, on: bool) {
        self.dispatch.store(on, Ordering::SeqCst);
    }

    pub fn generation(&self) -> &GenerationCounter {
        &self.generation
    }

    /// Number of write actions entered through `run_write`.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn write_threads(&self) -> Vec<ThreadId> {
        self.write_threads.lock().clone()
    }
}

impl ModelAccess for FakeAccess {
    fn holds_write_access(&self) -> bool {
        self.write.load(Ordering::SeqCst)
    }

    fn holds_read_access(&self) -> bool {
        self.read.load(Ordering::SeqCst)
    }

    fn is_dispatch_thread(&self) -> bool {
        self.dispatch.load(Ordering::SeqCst)
    }

    fn run_write(&self, action: &mut dyn FnMut()) -> Result<()> {
        self.generation.advance();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.write_threads.lock().push(thread::current().id());
        action();
        Ok(())
    }
}

/// Scheduler that only runs tasks when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<VecDeque<(Modality, Deferred)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn modalities(&self) -> Vec<Modality> {
        self.pending.lock().iter().map(|(m, _)| *m).collect()
    }

    /// Run the oldest pending task. Returns false if there was none.
    pub fn run_next(&self) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run pending tasks, including ones they schedule, until none are left.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl FireScheduler for ManualScheduler {
    fn schedule(&self, modality: Modality, task: Deferred) -> Result<()> {
        self.pending.lock().push_back((modality, task));
        Ok(())
    }
}

/// Scheduler that runs tasks on the submitting thread.
#[derive(Debug, Default)]
pub struct ImmediateScheduler {
    scheduled: AtomicUsize,
}

impl ImmediateScheduler {
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl FireScheduler for ImmediateScheduler {
    fn schedule(&self, _modality: Modality, task: Deferred) -> Result<()> {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        task();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CountingProgress {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl CountingProgress {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ProgressIndicator for CountingProgress {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener that records every batch it is asked about (logging `prepare`)
/// and returns an applier logging `before-change` / `after-change`.
#[derive(Debug, Default)]
pub struct RecordingListener {
    recorder: Recorder,
    batches: Mutex<Vec<Vec<ChangeEvent>>>,
    applied: Arc<AtomicUsize>,
    apply_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl RecordingListener {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            ..Self::default()
        }
    }

    /// How many times the listener computed an applier.
    pub fn prepared(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn batches(&self) -> Vec<Vec<ChangeEvent>> {
        self.batches.lock().clone()
    }

    /// How many appliers actually ran their `after_change` hook.
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn apply_threads(&self) -> Vec<ThreadId> {
        self.apply_threads.lock().clone()
    }
}

impl AsyncFileListener for RecordingListener {
    fn prepare_change(&self, events: &[ChangeEvent]) -> Option<Box<dyn ChangeApplier>> {
        self.batches.lock().push(events.to_vec());
        self.recorder.push("prepare");
        Some(Box::new(RecordingApplier {
            recorder: self.recorder.clone(),
            applied: Arc::clone(&self.applied),
            threads: Arc::clone(&self.apply_threads),
        }))
    }
}

struct RecordingApplier {
    recorder: Recorder,
    applied: Arc<AtomicUsize>,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl ChangeApplier for RecordingApplier {
    fn before_change(&mut self) {
        self.recorder.push("before-change");
    }

    fn after_change(&mut self) {
        self.recorder.push("after-change");
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.threads.lock().push(thread::current().id());
    }
}

/// Observer logging `refresh-start` / `refresh-finish`.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    recorder: Recorder,
}

impl RecordingObserver {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

impl RefreshObserver for RecordingObserver {
    fn before_refresh_start(&self, asynchronous: bool) {
        self.recorder.push(format!("refresh-start async={asynchronous}"));
    }

    fn after_refresh_finish(&self, asynchronous: bool) {
        self.recorder.push(format!("refresh-finish async={asynchronous}"));
    }
}

/// Tracing layer counting ERROR-level events.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter(Arc<AtomicUsize>);

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A subscriber whose only job is counting errors; install it with
/// `tracing::subscriber::with_default`.
pub fn error_counting_subscriber() -> (ErrorCounter, impl Subscriber + Send + Sync) {
    let counter = ErrorCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    (counter, subscriber)
}
