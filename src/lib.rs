// src/lib.rs

//! Coordinated file-system refresh.
//!
//! A [`RefreshQueue`](engine::RefreshQueue) accepts refresh sessions (sets of
//! roots to rescan), scans them one at a time on a worker, optionally
//! precomputes listener work off the dispatch thread, and applies the
//! resulting change events to a snapshot inside exclusive write actions.
//!
//! [`launch`] wires the default pieces together: a [`ModelLock`] bound to a
//! [`DispatchThread`], an in-memory snapshot, the file-system scanner and
//! the queue.

pub mod access;
pub mod config;
pub mod engine;
pub mod errors;
pub mod event;
pub mod fs;
pub mod logging;
pub mod snapshot;
pub mod types;

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::access::{DispatchThread, GenerationCounter, ModelLock};
use crate::config::RefreshConfig;
use crate::engine::{Collaborators, LogProgress, RefreshQueue};
use crate::errors::Result;
use crate::event::Listeners;
use crate::fs::FileSystem;
use crate::snapshot::{ExcludeSet, FsScanner, MemorySnapshot};

/// The default refresh pipeline, fully wired.
///
/// Dropping the stack disposes the queue and then stops the dispatch
/// thread.
pub struct RefreshStack {
    pub queue: Arc<RefreshQueue>,
    pub snapshot: Arc<MemorySnapshot>,
    pub listeners: Arc<Listeners>,
    pub lock: Arc<ModelLock>,
    pub dispatch: Arc<DispatchThread>,
}

impl fmt::Debug for RefreshStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshStack")
            .field("queue", &self.queue)
            .field("snapshot_entries", &self.snapshot.len())
            .field("listeners", &self.listeners.len())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl RefreshStack {
    /// Dispose the queue and stop the dispatch thread, without waiting for
    /// the last handle to go away.
    pub fn shutdown(&self) {
        self.queue.dispose();
        self.dispatch.shutdown();
    }
}

/// High-level entry point for embedding applications.
///
/// This wires together:
/// - the generation counter and the write lock that advances it
/// - the dispatch thread, bound to the lock
/// - an empty in-memory snapshot and the scanner diffing `fs` against it
/// - the refresh queue, with its workers running on `handle`
pub fn launch(config: &RefreshConfig, fs: Arc<dyn FileSystem>, handle: &Handle) -> Result<RefreshStack> {
    let generation = GenerationCounter::new();
    let lock = Arc::new(ModelLock::new(generation.clone()));
    let dispatch = Arc::new(DispatchThread::start(Some(Arc::clone(&lock)))?);

    let snapshot = Arc::new(MemorySnapshot::new());
    let listeners = Arc::new(Listeners::new());
    let excludes = ExcludeSet::compile(&config.scan().exclude)?;
    let scanner = FsScanner::new(fs, Arc::clone(&snapshot))
        .with_excludes(excludes)
        .with_content_hash(config.scan().content_hash);

    let queue = RefreshQueue::start(
        handle,
        config.queue().clone(),
        Collaborators {
            scanner: Arc::new(scanner),
            snapshot: snapshot.clone(),
            listeners: listeners.clone(),
            scheduler: dispatch.clone(),
            access: lock.clone(),
            generation,
            progress: Arc::new(LogProgress),
            observers: Vec::new(),
        },
    );

    info!(
        excludes = config.scan().exclude.len(),
        content_hash = config.scan().content_hash,
        "refresh stack launched"
    );

    Ok(RefreshStack {
        queue: Arc::new(queue),
        snapshot,
        listeners,
        lock,
        dispatch,
    })
}
