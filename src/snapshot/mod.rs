// src/snapshot/mod.rs

//! The snapshot side of the pipeline.
//!
//! The core only needs two things from a snapshot: whether a path is still
//! known (for the staleness filter) and a way to apply a batch of events.
//! This module defines that seam ([`Snapshot`]) and the scanner seam
//! ([`Scanner`]), plus simple default implementations:
//!
//! - [`memory`]: a flat, path-keyed in-memory snapshot.
//! - [`scanner`]: a scanner that diffs a [`FileSystem`](crate::fs::FileSystem)
//!   against a [`MemorySnapshot`].
//! - [`patterns`]: exclude globs applied while scanning.
//! - [`hash`]: optional content digests for file stamps.

use std::path::Path;

use crate::event::ChangeEvent;

pub mod hash;
pub mod memory;
pub mod patterns;
pub mod scanner;

pub use memory::{MemorySnapshot, SnapshotEntry};
pub use patterns::ExcludeSet;
pub use scanner::{FsScanner, ScanRequest, Scanner};

/// Event sink and validity oracle for the staleness filter.
pub trait Snapshot: Send + Sync {
    /// Whether `path` is currently known.
    fn contains(&self, path: &Path) -> bool;

    /// Whether `path` is a mounted root. A mounted root may be created
    /// even though its parent is not part of the snapshot.
    fn is_mount(&self, _path: &Path) -> bool {
        false
    }

    /// Apply a batch in order. Called from inside a write action.
    fn apply(&self, events: &[ChangeEvent]);
}
