//! Incremental-build staleness
//!
//! A target must be rebuilt when it is missing, when one of its
//! dependencies is missing, or when a dependency is at least as new as the
//! target. Equal timestamps rebuild.
//!
//! Modification times are read through a [`StatCache`]: each path is
//! stat'ed at most once per invocation and the answer never changes
//! afterwards, even if the file is rewritten mid-build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::infra::filesystem;

/// Per-invocation cache of modification times
#[derive(Debug, Default)]
pub struct StatCache {
    entries: Mutex<HashMap<PathBuf, Option<SystemTime>>>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached modification time, `None` if the path does not exist
    pub fn mtime(&self, path: &Path) -> Option<SystemTime> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *entries
            .entry(path.to_path_buf())
            .or_insert_with(|| filesystem::mtime(path))
    }

    /// Number of paths stat'ed so far
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `target` must be regenerated from `dependencies`
    pub fn need_update<P: AsRef<Path>>(&self, target: &Path, dependencies: &[P]) -> bool {
        // The target itself is read fresh: it may have been produced earlier
        // in this invocation.
        let Some(target_time) = filesystem::mtime(target) else {
            tracing::debug!("{} does not exist", target.display());
            return true;
        };
        for dep in dependencies {
            let dep = dep.as_ref();
            match self.mtime(dep) {
                None => {
                    tracing::debug!("{}: dependency {} is missing", target.display(), dep.display());
                    return true;
                }
                Some(dep_time) if dep_time >= target_time => {
                    tracing::debug!("{}: {} is newer", target.display(), dep.display());
                    return true;
                }
                Some(_) => {}
            }
        }
        false
    }
}
