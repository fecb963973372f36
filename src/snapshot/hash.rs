use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::event::FileStamp;
use crate::fs::{FileMeta, FileSystem};

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Build the stamp recorded for `path`.
///
/// Directories never carry a digest. A file that cannot be read is stamped
/// without one; the size and mtime still detect most changes.
pub fn stamp_for(fs: &dyn FileSystem, path: &Path, meta: &FileMeta, with_hash: bool) -> FileStamp {
    let hash = if with_hash && !meta.is_dir {
        match compute_file_hash(fs, path) {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::debug!(?path, error = %e, "content hash unavailable");
                None
            }
        }
    } else {
        None
    };
    FileStamp {
        len: meta.len,
        modified: meta.modified,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn hashes_mock_file_contents() {
        let fs = MockFileSystem::new();
        fs.add_file("/test.txt", "hello world");

        let hash = compute_file_hash(&fs, Path::new("/test.txt")).unwrap();
        // blake3 hash of "hello world"
        assert_eq!(hash, "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24");
    }

    #[test]
    fn stamp_hash_is_optional() {
        let fs = MockFileSystem::new();
        fs.add_file("/a", "abc");
        let meta = fs.metadata(Path::new("/a")).unwrap();
        assert!(stamp_for(&fs, Path::new("/a"), &meta, false).hash.is_none());
        assert!(stamp_for(&fs, Path::new("/a"), &meta, true).hash.is_some());
    }
}
