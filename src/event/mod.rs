// src/event/mod.rs

//! Change events produced by scans and consumed by listeners and the
//! snapshot.
//!
//! - [`filter`] drops events whose targets went stale between detection and
//!   firing.
//! - [`listener`] holds the asynchronous listener registry and the appliers
//!   it computes.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

pub mod filter;
pub mod listener;

pub use filter::retain_valid;
pub use listener::{AsyncFileListener, ChangeApplier, ListenerRegistry, Listeners};

/// Attributes observed for a file when an event was detected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// blake3 hex digest, only present when content hashing is enabled.
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A child named `name` appeared under the event's target directory.
    Create {
        name: String,
        is_directory: bool,
        stamp: FileStamp,
    },
    Delete,
    ContentChange {
        stamp: FileStamp,
    },
    Move {
        new_parent: PathBuf,
    },
}

/// One detected change.
///
/// For [`ChangeKind::Create`] the `target` is the *parent* directory; the
/// child does not exist in the snapshot yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub target: PathBuf,
}

impl ChangeEvent {
    pub fn create(
        parent: impl Into<PathBuf>,
        name: impl Into<String>,
        is_directory: bool,
        stamp: FileStamp,
    ) -> Self {
        Self {
            kind: ChangeKind::Create {
                name: name.into(),
                is_directory,
                stamp,
            },
            target: parent.into(),
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            target: path.into(),
        }
    }

    pub fn content_change(path: impl Into<PathBuf>, stamp: FileStamp) -> Self {
        Self {
            kind: ChangeKind::ContentChange { stamp },
            target: path.into(),
        }
    }

    pub fn moved(path: impl Into<PathBuf>, new_parent: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Move {
                new_parent: new_parent.into(),
            },
            target: path.into(),
        }
    }

    /// The path the event is about: the new child for creations, the target
    /// otherwise.
    pub fn path(&self) -> PathBuf {
        match &self.kind {
            ChangeKind::Create { name, .. } => self.target.join(name),
            _ => self.target.clone(),
        }
    }

    /// Where the file lives once the event has been applied, if anywhere.
    pub fn resulting_path(&self) -> Option<PathBuf> {
        match &self.kind {
            ChangeKind::Create { name, .. } => Some(self.target.join(name)),
            ChangeKind::Delete => None,
            ChangeKind::ContentChange { .. } => Some(self.target.clone()),
            ChangeKind::Move { new_parent } => self.target.file_name().map(|n| new_parent.join(n)),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self.kind, ChangeKind::Create { .. })
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ChangeKind::Create { name, is_directory, .. } => {
                let what = if *is_directory { "dir" } else { "file" };
                write!(f, "create {what} {}", self.target.join(name).display())
            }
            ChangeKind::Delete => write!(f, "delete {}", self.target.display()),
            ChangeKind::ContentChange { .. } => write!(f, "content {}", self.target.display()),
            ChangeKind::Move { new_parent } => write!(
                f,
                "move {} -> {}",
                self.target.display(),
                new_parent.display()
            ),
        }
    }
}
