// src/event/filter.rs

//! Staleness filter applied right before listeners see a batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::event::{ChangeEvent, ChangeKind};
use crate::snapshot::Snapshot;

/// Drop events whose targets became invalid since detection.
///
/// Validity is evaluated in batch order: a directory created by an earlier
/// event in the same batch is a valid parent for later creations, and a path
/// deleted earlier in the batch is no longer present.
pub fn retain_valid(events: Vec<ChangeEvent>, snapshot: &dyn Snapshot) -> Vec<ChangeEvent> {
    let mut view = BatchView {
        snapshot,
        created: HashSet::new(),
        removed: Vec::new(),
    };

    let before = events.len();
    let kept: Vec<ChangeEvent> = events
        .into_iter()
        .filter(|event| {
            let valid = view.is_valid(event);
            if valid {
                view.record(event);
            } else {
                trace!(%event, "dropping stale event");
            }
            valid
        })
        .collect();

    if kept.len() != before {
        trace!(dropped = before - kept.len(), "stale events filtered");
    }
    kept
}

struct BatchView<'a> {
    snapshot: &'a dyn Snapshot,
    created: HashSet<PathBuf>,
    removed: Vec<PathBuf>,
}

impl BatchView<'_> {
    fn present(&self, path: &Path) -> bool {
        if self.created.contains(path) {
            return true;
        }
        self.snapshot.contains(path) && !self.removed.iter().any(|r| path.starts_with(r))
    }

    fn is_valid(&self, event: &ChangeEvent) -> bool {
        match &event.kind {
            ChangeKind::Create { name, .. } => {
                let path = event.target.join(name);
                (self.present(&event.target) || self.snapshot.is_mount(&path))
                    && !self.present(&path)
            }
            ChangeKind::Delete | ChangeKind::ContentChange { .. } => self.present(&event.target),
            ChangeKind::Move { new_parent } => {
                self.present(&event.target) && self.present(new_parent)
            }
        }
    }

    fn record(&mut self, event: &ChangeEvent) {
        match &event.kind {
            ChangeKind::Create { .. } => {
                self.created.insert(event.path());
            }
            ChangeKind::Delete => {
                self.created.retain(|p| !p.starts_with(&event.target));
                self.removed.push(event.target.clone());
            }
            ChangeKind::ContentChange { .. } => {}
            ChangeKind::Move { .. } => {
                self.created.retain(|p| !p.starts_with(&event.target));
                self.removed.push(event.target.clone());
                if let Some(dest) = event.resulting_path() {
                    self.created.insert(dest);
                }
            }
        }
    }
}
