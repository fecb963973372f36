// src/snapshot/memory.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::event::{ChangeEvent, ChangeKind, FileStamp};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub is_dir: bool,
    pub stamp: FileStamp,
}

/// Flat in-memory snapshot keyed by full path.
///
/// Children of a directory are the keys whose parent is that directory;
/// deleting or moving a directory affects its whole subtree.
///
/// Top-level entries hang off mount points: a mounted root can be created
/// without its parent being known, and stays mounted when it is deleted.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    entries: RwLock<BTreeMap<PathBuf, SnapshotEntry>>,
    mounts: RwLock<BTreeSet<PathBuf>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry directly, bypassing the event pipeline.
    pub fn insert(&self, path: impl Into<PathBuf>, is_dir: bool, stamp: FileStamp) {
        self.entries
            .write()
            .insert(path.into(), SnapshotEntry { is_dir, stamp });
    }

    /// Register `root` as a mount point. Returns false if it already was.
    pub fn mount(&self, root: impl Into<PathBuf>) -> bool {
        let root = root.into();
        let added = self.mounts.write().insert(root.clone());
        if added {
            debug!(root = %root.display(), "root mounted");
        }
        added
    }

    pub fn mounts(&self) -> Vec<PathBuf> {
        self.mounts.read().iter().cloned().collect()
    }

    pub fn get(&self, path: &Path) -> Option<SnapshotEntry> {
        self.entries.read().get(path).cloned()
    }

    /// Direct children of `dir`, sorted by path.
    pub fn children(&self, dir: &Path) -> Vec<(PathBuf, SnapshotEntry)> {
        self.entries
            .read()
            .range(dir.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(dir))
            .filter(|(p, _)| p.parent() == Some(dir))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn apply_one(entries: &mut BTreeMap<PathBuf, SnapshotEntry>, event: &ChangeEvent) {
        match &event.kind {
            ChangeKind::Create {
                name,
                is_directory,
                stamp,
            } => {
                entries.insert(
                    event.target.join(name),
                    SnapshotEntry {
                        is_dir: *is_directory,
                        stamp: stamp.clone(),
                    },
                );
            }
            ChangeKind::Delete => {
                entries.retain(|p, _| !p.starts_with(&event.target));
            }
            ChangeKind::ContentChange { stamp } => {
                if let Some(entry) = entries.get_mut(&event.target) {
                    entry.stamp = stamp.clone();
                }
            }
            ChangeKind::Move { .. } => {
                let Some(dest) = event.resulting_path() else {
                    return;
                };
                let moved: Vec<PathBuf> = entries
                    .keys()
                    .filter(|p| p.starts_with(&event.target))
                    .cloned()
                    .collect();
                for old in moved {
                    if let Some(entry) = entries.remove(&old) {
                        let suffix = old.strip_prefix(&event.target).unwrap_or(Path::new(""));
                        let new = if suffix.as_os_str().is_empty() {
                            dest.clone()
                        } else {
                            dest.join(suffix)
                        };
                        entries.insert(new, entry);
                    }
                }
            }
        }
        trace!(%event, "applied to snapshot");
    }
}

impl Snapshot for MemorySnapshot {
    fn contains(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    fn is_mount(&self, path: &Path) -> bool {
        self.mounts.read().contains(path)
    }

    fn apply(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        for event in events {
            Self::apply_one(&mut entries, event);
        }
        debug!(applied = events.len(), size = entries.len(), "snapshot updated");
    }
}
