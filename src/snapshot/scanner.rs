// src/snapshot/scanner.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::engine::CancelFlag;
use crate::event::ChangeEvent;
use crate::fs::{FileMeta, FileSystem};
use crate::snapshot::hash::stamp_for;
use crate::snapshot::{ExcludeSet, MemorySnapshot, Snapshot, SnapshotEntry};

/// What one scan is asked to do.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    /// Roots in discovery order; events are reported in the same order.
    pub roots: &'a [PathBuf],
    pub recursive: bool,
    /// Best-effort early-exit signal. Scanners should poll it regularly and
    /// return what they found so far once it is set.
    pub cancel: &'a CancelFlag,
}

/// Performs the file-system walk for a session.
pub trait Scanner: Send + Sync {
    fn scan(&self, request: &ScanRequest<'_>) -> Result<Vec<ChangeEvent>>;
}

/// Default scanner: diffs a [`FileSystem`] against a [`MemorySnapshot`].
///
/// - A root missing from the snapshot is reported as created (with its
///   whole subtree when recursive). If its parent is unknown too, the root
///   is mounted first so the creation survives the staleness filter.
/// - A known directory is compared child by child; subdirectories are
///   descended into only when the request is recursive.
/// - Files are compared by stamp (size, mtime, optional content digest).
///
/// The cancel flag is polled once per root and once per directory visited.
pub struct FsScanner {
    fs: Arc<dyn FileSystem>,
    snapshot: Arc<MemorySnapshot>,
    excludes: ExcludeSet,
    content_hash: bool,
}

impl fmt::Debug for FsScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsScanner")
            .field("excludes", &self.excludes)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

impl FsScanner {
    pub fn new(fs: Arc<dyn FileSystem>, snapshot: Arc<MemorySnapshot>) -> Self {
        Self {
            fs,
            snapshot,
            excludes: ExcludeSet::default(),
            content_hash: false,
        }
    }

    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_content_hash(mut self, enabled: bool) -> Self {
        self.content_hash = enabled;
        self
    }

    fn scan_root(&self, root: &Path, request: &ScanRequest<'_>, out: &mut Vec<ChangeEvent>) {
        let known = self.snapshot.get(root);
        let on_disk = self.fs.metadata(root);

        match (known, on_disk) {
            (None, None) => debug!(?root, "root unknown and absent; nothing to do"),
            (Some(_), None) => out.push(ChangeEvent::delete(root)),
            (None, Some(meta)) => {
                let Some((parent, name)) = split_parent(root) else {
                    debug!(?root, "root has no parent; cannot report its creation");
                    return;
                };
                if !self.snapshot.contains(&parent) {
                    self.snapshot.mount(root);
                }
                self.report_created(root, &parent, &name, &meta, root, request, out);
            }
            (Some(entry), Some(meta)) => {
                if entry.is_dir != meta.is_dir {
                    self.report_replaced(root, &meta, root, request, out);
                } else if meta.is_dir {
                    self.walk_known_dir(root, request, out);
                } else {
                    self.compare_file(root, &entry, &meta, out);
                }
            }
        }
    }

    /// Compare a known directory (and, if recursive, its known
    /// subdirectories) against disk.
    fn walk_known_dir(&self, root: &Path, request: &ScanRequest<'_>, out: &mut Vec<ChangeEvent>) {
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            if request.cancel.is_cancelled() {
                debug!(?dir, "scan cancelled");
                return;
            }

            let on_disk = match self.fs.read_dir(&dir) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(?dir, error = %e, "failed to list directory; skipping");
                    continue;
                }
            };

            let mut known: BTreeMap<PathBuf, SnapshotEntry> =
                self.snapshot.children(&dir).into_iter().collect();
            let mut subdirs = Vec::new();

            for path in on_disk {
                if self.excludes.is_excluded(root, &path) {
                    known.remove(&path);
                    continue;
                }
                let Some(meta) = self.fs.metadata(&path) else {
                    // Vanished between listing and stat.
                    continue;
                };
                match known.remove(&path) {
                    None => {
                        let name = file_name_string(&path);
                        self.report_created(&path, &dir, &name, &meta, root, request, out);
                    }
                    Some(entry) if entry.is_dir != meta.is_dir => {
                        self.report_replaced(&path, &meta, root, request, out);
                    }
                    Some(_) if meta.is_dir => {
                        if request.recursive {
                            subdirs.push(path);
                        }
                    }
                    Some(entry) => self.compare_file(&path, &entry, &meta, out),
                }
            }

            for (gone, _) in known {
                if !self.excludes.is_excluded(root, &gone) {
                    out.push(ChangeEvent::delete(gone));
                }
            }

            // Reverse so the stack pops subdirectories in sorted order.
            stack.extend(subdirs.into_iter().rev());
        }
    }

    fn compare_file(
        &self,
        path: &Path,
        entry: &SnapshotEntry,
        meta: &FileMeta,
        out: &mut Vec<ChangeEvent>,
    ) {
        let stamp = stamp_for(self.fs.as_ref(), path, meta, self.content_hash);
        if stamp != entry.stamp {
            out.push(ChangeEvent::content_change(path, stamp));
        }
    }

    /// A path that changed between file and directory.
    fn report_replaced(
        &self,
        path: &Path,
        meta: &FileMeta,
        root: &Path,
        request: &ScanRequest<'_>,
        out: &mut Vec<ChangeEvent>,
    ) {
        out.push(ChangeEvent::delete(path));
        if let Some((parent, name)) = split_parent(path) {
            self.report_created(path, &parent, &name, meta, root, request, out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report_created(
        &self,
        path: &Path,
        parent: &Path,
        name: &str,
        meta: &FileMeta,
        root: &Path,
        request: &ScanRequest<'_>,
        out: &mut Vec<ChangeEvent>,
    ) {
        let stamp = stamp_for(self.fs.as_ref(), path, meta, self.content_hash);
        out.push(ChangeEvent::create(parent, name, meta.is_dir, stamp));
        if meta.is_dir && request.recursive {
            self.collect_new_subtree(path, root, request, out);
        }
    }

    /// Report every descendant of a newly created directory.
    fn collect_new_subtree(
        &self,
        dir: &Path,
        root: &Path,
        request: &ScanRequest<'_>,
        out: &mut Vec<ChangeEvent>,
    ) {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            if request.cancel.is_cancelled() {
                debug!(dir = ?current, "scan cancelled");
                return;
            }
            let children = match self.fs.read_dir(&current) {
                Ok(c) => c,
                Err(e) => {
                    warn!(dir = ?current, error = %e, "failed to list new directory");
                    continue;
                }
            };
            let mut subdirs = Vec::new();
            for path in children {
                if self.excludes.is_excluded(root, &path) {
                    continue;
                }
                let Some(meta) = self.fs.metadata(&path) else {
                    continue;
                };
                let stamp = stamp_for(self.fs.as_ref(), &path, &meta, self.content_hash);
                out.push(ChangeEvent::create(
                    &current,
                    file_name_string(&path),
                    meta.is_dir,
                    stamp,
                ));
                if meta.is_dir {
                    subdirs.push(path);
                }
            }
            stack.extend(subdirs.into_iter().rev());
        }
    }
}

impl Scanner for FsScanner {
    fn scan(&self, request: &ScanRequest<'_>) -> Result<Vec<ChangeEvent>> {
        let mut events = Vec::new();
        for root in request.roots {
            if request.cancel.is_cancelled() {
                debug!(?root, "scan cancelled before root");
                break;
            }
            self.scan_root(root, request, &mut events);
        }
        debug!(
            roots = request.roots.len(),
            recursive = request.recursive,
            events = events.len(),
            "scan finished"
        );
        Ok(events)
    }
}

fn split_parent(path: &Path) -> Option<(PathBuf, String)> {
    let parent = path.parent()?;
    let name = path.file_name()?;
    Some((parent.to_path_buf(), name.to_string_lossy().into_owned()))
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
