// src/access/mod.rs

//! Exclusive-write coordination.
//!
//! - [`generation`]: the process-wide counter bumped on every write action
//!   start, used to detect stale precomputed results.
//! - [`lock`]: the [`ModelAccess`] seam the refresh queue consults, and
//!   [`ModelLock`], its default read/write implementation.
//! - [`dispatch`]: the [`FireScheduler`] seam and [`DispatchThread`], the
//!   privileged thread that runs deferred fires in modality order.

pub mod dispatch;
pub mod generation;
pub mod lock;

pub use dispatch::{Deferred, DispatchThread, FireScheduler};
pub use generation::GenerationCounter;
pub use lock::{ModelAccess, ModelLock};
