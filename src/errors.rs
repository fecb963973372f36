// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),

    /// Synchronous refresh requested under a shared read lock from a thread
    /// that is not the dispatch thread.
    #[error("synchronous refresh refused: caller holds shared read access off the dispatch thread")]
    DeadlockHazard,

    /// A bounded work queue (or the dispatch thread) did not accept new work.
    #[error("{queue} rejected work: {reason}")]
    Rejected {
        queue: &'static str,
        reason: RejectReason,
    },

    /// Synchronous refresh requested from inside a current-thread runtime,
    /// which cannot keep driving the queue while the caller blocks.
    #[error("synchronous refresh refused: caller runs on a current-thread async runtime")]
    BlockingInRuntime,

    #[error("refresh queue has been disposed")]
    Disposed,

    #[error("cannot start a write action while holding shared read access")]
    LockUpgrade,

    #[error("write actions are only allowed on the dispatch thread")]
    WriteOffDispatch,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue is at capacity.
    Full,
    /// The consumer has shut down.
    Closed,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Full => write!(f, "queue full"),
            RejectReason::Closed => write!(f, "queue closed"),
        }
    }
}

impl RefreshError {
    pub(crate) fn rejected(queue: &'static str, reason: RejectReason) -> Self {
        RefreshError::Rejected { queue, reason }
    }

    /// Submission rejections are expected during shutdown and are never
    /// escalated.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RefreshError::Rejected { .. } | RefreshError::Disposed)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RefreshError>;
