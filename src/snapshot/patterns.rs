// src/snapshot/patterns.rs

use std::fmt;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::Result;

/// Compiled exclude globs.
///
/// Patterns are matched against paths relative to the scanned root, with
/// forward slashes (e.g. `"target/debug/app"`).
#[derive(Clone, Default)]
pub struct ExcludeSet {
    set: Option<GlobSet>,
    patterns: Vec<String>,
}

impl fmt::Debug for ExcludeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeSet")
            .field("patterns", &self.patterns)
            .finish()
    }
}

impl ExcludeSet {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            builder.add(Glob::new(pat)?);
        }
        Ok(Self {
            set: Some(builder.build()?),
            patterns: patterns.to_vec(),
        })
    }

    /// Returns true if `path` (somewhere below `root`) is excluded.
    ///
    /// The root itself is never excluded.
    pub fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let Some(set) = &self.set else {
            return false;
        };
        match relative_str(root, path) {
            Some(rel) if !rel.is_empty() => set.is_match(rel.as_str()),
            _ => false,
        }
    }
}

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Returns `None` if the path is not below `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}
