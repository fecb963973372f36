// src/engine/mod.rs

//! Refresh coordination engine.
//!
//! This module ties together:
//! - refresh sessions and their lifecycle ([`session`])
//! - the registry of scanning sessions, used for cancellation ([`registry`])
//! - the busy/activity tracker driving the progress indicator ([`activity`])
//! - the scan worker and the preprocessor, both fed by bounded queues
//! - firing: applying batches to the snapshot inside write actions
//! - the public entry point, [`RefreshQueue`]
//!
//! The pure decisions (which path a session takes, whether a precomputed
//! batch is still current, legal lifecycle transitions) live in [`core`];
//! everything else is the IO shell around it.

pub mod activity;
pub mod core;
pub mod fire;
pub mod queue;
pub mod registry;
pub mod session;

mod preprocessor;
mod scan_worker;

pub use activity::{ActivityGuard, ActivityTracker, LogProgress, ProgressIndicator};
pub use self::core::{choose_path, commit_decision, AccessProbe, CommitDecision, ExecutionPath, SessionStage};
pub use fire::RefreshObserver;
pub use queue::{Collaborators, RefreshQueue};
pub use registry::SessionRegistry;
pub use session::{CancelFlag, FinishCallback, RefreshSession};
