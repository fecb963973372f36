#![allow(dead_code)]

use std::sync::Arc;

use tokio::runtime::Handle;

use fsrefresh::access::{FireScheduler, GenerationCounter};
use fsrefresh::config::{QueueSection, RawRefreshConfig, RefreshConfig};
use fsrefresh::engine::{Collaborators, RefreshObserver, RefreshQueue};
use fsrefresh::event::Listeners;
use fsrefresh::snapshot::MemorySnapshot;
use fsrefresh::types::Modality;

use crate::fakes::{
    CountingProgress, FakeAccess, ImmediateScheduler, Recorder, RecordingListener,
    RecordingObserver, ScriptedScanner,
};

/// Builder for `RefreshConfig` to simplify test setup.
pub struct RefreshConfigBuilder {
    config: RawRefreshConfig,
}

impl RefreshConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawRefreshConfig::default(),
        }
    }

    pub fn scan_capacity(mut self, n: usize) -> Self {
        self.config.queue.scan_capacity = n;
        self
    }

    pub fn preprocess_capacity(mut self, n: usize) -> Self {
        self.config.queue.preprocess_capacity = n;
        self
    }

    pub fn async_preprocessing(mut self, val: bool) -> Self {
        self.config.queue.async_preprocessing = val;
        self
    }

    pub fn single_event_modality(mut self, modality: Modality) -> Self {
        self.config.queue.single_event_modality = modality;
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.config.scan.exclude.push(pattern.to_string());
        self
    }

    pub fn content_hash(mut self, val: bool) -> Self {
        self.config.scan.content_hash = val;
        self
    }

    pub fn build(self) -> RefreshConfig {
        RefreshConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for RefreshConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A refresh queue wired to fakes, with handles to all of them.
pub struct QueueHarness {
    pub queue: Arc<RefreshQueue>,
    pub scanner: Arc<ScriptedScanner>,
    pub snapshot: Arc<MemorySnapshot>,
    pub listener: Arc<RecordingListener>,
    pub access: Arc<FakeAccess>,
    pub progress: Arc<CountingProgress>,
    pub recorder: Recorder,
}

/// Builder for [`QueueHarness`].
///
/// Defaults: default queue config, an [`ImmediateScheduler`], one
/// [`RecordingListener`] and one [`RecordingObserver`] sharing the harness
/// recorder.
pub struct QueueHarnessBuilder {
    config: QueueSection,
    scheduler: Option<Arc<dyn FireScheduler>>,
    observers: Vec<Arc<dyn RefreshObserver>>,
}

impl QueueHarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueSection::default(),
            scheduler: None,
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: QueueSection) -> Self {
        self.config = config;
        self
    }

    pub fn async_preprocessing(mut self, val: bool) -> Self {
        self.config.async_preprocessing = val;
        self
    }

    pub fn scan_capacity(mut self, n: usize) -> Self {
        self.config.scan_capacity = n;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn FireScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self, handle: &Handle) -> QueueHarness {
        let recorder = Recorder::default();
        let generation = GenerationCounter::new();
        let scanner = Arc::new(ScriptedScanner::new(recorder.clone()));
        let snapshot = Arc::new(MemorySnapshot::new());
        let listener = Arc::new(RecordingListener::new(recorder.clone()));
        let listeners = Arc::new(Listeners::new());
        listeners.add(listener.clone());
        let access = Arc::new(FakeAccess::new(generation.clone()));
        let progress = Arc::new(CountingProgress::default());

        let mut observers = self.observers;
        observers.push(Arc::new(RecordingObserver::new(recorder.clone())));

        let queue = RefreshQueue::start(
            handle,
            self.config,
            Collaborators {
                scanner: scanner.clone(),
                snapshot: snapshot.clone(),
                listeners,
                scheduler: self
                    .scheduler
                    .unwrap_or_else(|| Arc::new(ImmediateScheduler::default()) as Arc<dyn FireScheduler>),
                access: access.clone(),
                generation,
                progress: progress.clone(),
                observers,
            },
        );

        QueueHarness {
            queue: Arc::new(queue),
            scanner,
            snapshot,
            listener,
            access,
            progress,
            recorder,
        }
    }
}

impl Default for QueueHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
