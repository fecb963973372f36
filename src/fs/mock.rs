// src/fs/mock.rs

use super::{FileMeta, FileSystem};
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
enum MockEntry {
    /// Contents plus a write counter standing in for the mtime.
    File { content: Vec<u8>, version: u64 },
    Dir,
}

/// In-memory filesystem for tests.
///
/// Paths are used verbatim (no normalisation); parents are created
/// implicitly. `read_dir` lists children in sorted order.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<BTreeMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut entries = self.entries.lock();
        ensure_dir_entry(&mut entries, path.as_ref());
    }

    /// Create or overwrite a file. Overwriting bumps its modification time.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut entries = self.entries.lock();
        if let Some(parent) = path.parent() {
            ensure_dir_entry(&mut entries, parent);
        }
        let version = match entries.get(&path) {
            Some(MockEntry::File { version, .. }) => version + 1,
            _ => 1,
        };
        entries.insert(
            path,
            MockEntry::File {
                content: content.into(),
                version,
            },
        );
    }

    /// Replace a file's bytes without touching its modification time.
    pub fn rewrite_in_place(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut entries = self.entries.lock();
        if let Some(MockEntry::File { content: bytes, .. }) = entries.get_mut(path.as_ref()) {
            *bytes = content.into();
        }
    }

    /// Remove `path` and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut entries = self.entries.lock();
        entries.retain(|p, _| !p.starts_with(path));
    }
}

fn ensure_dir_entry(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
    if path.as_os_str().is_empty() || entries.contains_key(path) {
        return;
    }
    if let Some(parent) = path.parent() {
        ensure_dir_entry(entries, parent);
    }
    entries.insert(path.to_path_buf(), MockEntry::Dir);
}

impl FileSystem for MockFileSystem {
    fn metadata(&self, path: &Path) -> Option<FileMeta> {
        let entries = self.entries.lock();
        match entries.get(path)? {
            MockEntry::Dir => Some(FileMeta {
                is_dir: true,
                len: 0,
                modified: None,
            }),
            MockEntry::File { content, version } => Some(FileMeta {
                is_dir: false,
                len: content.len() as u64,
                modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(*version)),
            }),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let entries = self.entries.lock();
        match entries.get(path) {
            Some(MockEntry::File { content, .. }) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.entries.lock();
        match entries.get(path) {
            Some(MockEntry::Dir) => Ok(entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
