//! Incremental per-file artifact cache.
//!
//! Entries are keyed by `(task, source path)` and hold the BLAKE3 fingerprint
//! of the source content together with the artifact computed from it. For
//! every task the cache also remembers which sources contributed so far,
//! ordered by path, which lets aggregating stages recombine the artifacts of
//! their full source set after recompiling only the files that changed.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Hash32;
use crate::error::CacheError;

/// Shared, immutable result of a per-file transform.
pub type Artifact = Arc<[u8]>;

/// Result of [`Cache::fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub artifact: Artifact,
    /// `false` when the cached artifact was reused.
    pub recomputed: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    fingerprint: Hash32,
    artifact: Artifact,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<(String, Utf8PathBuf), Entry>,
    retained: HashMap<String, Vec<Utf8PathBuf>>,
}

impl State {
    fn remove(&mut self, task: &str, path: &Utf8Path) -> bool {
        let removed = self
            .entries
            .remove(&(task.to_owned(), path.to_owned()))
            .is_some();

        if let Some(retained) = self.retained.get_mut(task) {
            retained.retain(|p| p != path);
        }

        removed
    }
}

/// Process-wide artifact store. Lives as long as the [`Pipeline`](crate::Pipeline)
/// and is never persisted.
#[derive(Debug, Default)]
pub struct Cache {
    state: Mutex<State>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the artifact for `path` under `task`, running `compute` on the
    /// file content only when its fingerprint differs from the stored one.
    ///
    /// A failing `compute` leaves the cache exactly as it was.
    pub fn get_or_compute<F>(
        &self,
        task: &str,
        path: &Utf8Path,
        compute: F,
    ) -> Result<Artifact, CacheError>
    where
        F: FnOnce(&[u8]) -> anyhow::Result<Vec<u8>>,
    {
        self.fetch(task, path, compute).map(|fetched| fetched.artifact)
    }

    /// Same as [`Cache::get_or_compute`], also reporting whether the artifact
    /// had to be recomputed.
    pub fn fetch<F>(&self, task: &str, path: &Utf8Path, compute: F) -> Result<Fetched, CacheError>
    where
        F: FnOnce(&[u8]) -> anyhow::Result<Vec<u8>>,
    {
        let bytes = fs::read(path).map_err(|source| CacheError::Read {
            path: path.to_owned(),
            source,
        })?;
        let fingerprint = Hash32::hash(&bytes);
        let key = (task.to_owned(), path.to_owned());

        if let Some(entry) = self.lock().entries.get(&key)
            && entry.fingerprint == fingerprint
        {
            return Ok(Fetched {
                artifact: entry.artifact.clone(),
                recomputed: false,
            });
        }

        tracing::debug!(task, %path, "recomputing artifact");

        // The lock is released while the transform runs.
        let artifact: Artifact = compute(&bytes)
            .map_err(|source| CacheError::Compute {
                path: path.to_owned(),
                source,
            })?
            .into();

        let mut state = self.lock();
        state.entries.insert(
            key,
            Entry {
                fingerprint,
                artifact: artifact.clone(),
            },
        );

        let retained = state.retained.entry(task.to_owned()).or_default();
        if let Err(index) = retained.binary_search_by(|p| p.as_path().cmp(path)) {
            retained.insert(index, path.to_owned());
        }

        Ok(Fetched {
            artifact,
            recomputed: true,
        })
    }

    /// Evicts the entry for `path` and drops it from the task's retained set.
    /// Unknown keys are ignored.
    pub fn forget(&self, task: &str, path: &Utf8Path) {
        if self.lock().remove(task, path) {
            tracing::debug!(task, %path, "forgot cached artifact");
        }
    }

    /// Forgets every retained source of `task` that is not part of `live`.
    pub fn prune(&self, task: &str, live: &[Utf8PathBuf]) {
        let mut state = self.lock();

        let stale: Vec<Utf8PathBuf> = state
            .retained
            .get(task)
            .map(|retained| {
                retained
                    .iter()
                    .filter(|path| !live.contains(path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for path in stale {
            state.remove(task, &path);
        }
    }

    /// Concatenates the artifacts of the task's retained set in path order,
    /// each terminated by a newline. A source added later still lands in its
    /// sorted place.
    pub fn recombine(&self, task: &str) -> Vec<u8> {
        let state = self.lock();
        let mut buffer = Vec::new();

        let Some(retained) = state.retained.get(task) else {
            return buffer;
        };

        for path in retained {
            let Some(entry) = state.entries.get(&(task.to_owned(), path.clone())) else {
                continue;
            };

            buffer.extend_from_slice(&entry.artifact);
            if !buffer.is_empty() && !buffer.ends_with(b"\n") {
                buffer.push(b'\n');
            }
        }

        buffer
    }

    /// Sources currently retained for `task`, sorted by path.
    pub fn retained(&self, task: &str) -> Vec<Utf8PathBuf> {
        self.lock().retained.get(task).cloned().unwrap_or_default()
    }

    pub fn contains(&self, task: &str, path: &Utf8Path) -> bool {
        self.lock()
            .entries
            .contains_key(&(task.to_owned(), path.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tempfile::TempDir;

    use super::*;

    fn sandbox() -> (TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn upper(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(bytes.to_ascii_uppercase())
    }

    #[test]
    fn test_unchanged_file_is_not_recomputed() {
        let (_dir, root) = sandbox();
        let path = root.join("a.less");
        fs::write(&path, "a").unwrap();

        let cache = Cache::new();
        let calls = Cell::new(0);
        let compute = |bytes: &[u8]| {
            calls.set(calls.get() + 1);
            upper(bytes)
        };

        let first = cache.get_or_compute("styles", &path, compute).unwrap();
        let second = cache.get_or_compute("styles", &path, compute).unwrap();

        assert_eq!(&*first, b"A");
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_changed_file_is_recomputed() {
        let (_dir, root) = sandbox();
        let path = root.join("a.less");
        let cache = Cache::new();

        fs::write(&path, "one").unwrap();
        assert!(cache.fetch("styles", &path, upper).unwrap().recomputed);
        assert!(!cache.fetch("styles", &path, upper).unwrap().recomputed);

        fs::write(&path, "two").unwrap();
        let fetched = cache.fetch("styles", &path, upper).unwrap();
        assert!(fetched.recomputed);
        assert_eq!(&*fetched.artifact, b"TWO");
    }

    #[test]
    fn test_entries_are_namespaced_by_task() {
        let (_dir, root) = sandbox();
        let path = root.join("logo.png");
        fs::write(&path, "png").unwrap();

        let cache = Cache::new();
        cache.get_or_compute("images", &path, upper).unwrap();

        assert!(cache.contains("images", &path));
        assert!(!cache.contains("sprites", &path));
        assert!(cache.fetch("sprites", &path, upper).unwrap().recomputed);
    }

    #[test]
    fn test_failed_compute_leaves_entry() {
        let (_dir, root) = sandbox();
        let path = root.join("a.less");
        let cache = Cache::new();

        fs::write(&path, "good").unwrap();
        cache.get_or_compute("styles", &path, upper).unwrap();

        fs::write(&path, "bad").unwrap();
        let result = cache.get_or_compute("styles", &path, |_| anyhow::bail!("syntax error"));
        assert!(matches!(result, Err(CacheError::Compute { .. })));

        assert_eq!(cache.recombine("styles"), b"GOOD\n");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let (_dir, root) = sandbox();
        let cache = Cache::new();
        let result = cache.get_or_compute("styles", &root.join("gone.less"), upper);
        assert!(matches!(result, Err(CacheError::Read { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_recombine_in_path_order() {
        let (_dir, root) = sandbox();
        let cache = Cache::new();

        for name in ["a", "b", "c"] {
            let path = root.join(format!("{name}.less"));
            fs::write(&path, name).unwrap();
            cache.get_or_compute("styles", &path, upper).unwrap();
        }

        // recomputing an existing member keeps its position
        fs::write(root.join("a.less"), "a2").unwrap();
        cache
            .get_or_compute("styles", &root.join("a.less"), upper)
            .unwrap();

        assert_eq!(cache.recombine("styles"), b"A2\nB\nC\n");
    }

    #[test]
    fn test_forget_removes_from_aggregate() {
        let (_dir, root) = sandbox();
        let cache = Cache::new();

        for name in ["a", "b", "c"] {
            let path = root.join(format!("{name}.less"));
            fs::write(&path, name).unwrap();
            cache.get_or_compute("styles", &path, upper).unwrap();
        }

        cache.forget("styles", &root.join("b.less"));

        assert!(!cache.contains("styles", &root.join("b.less")));
        assert_eq!(cache.retained("styles").len(), 2);
        assert_eq!(cache.recombine("styles"), b"A\nC\n");
    }

    #[test]
    fn test_forget_unknown_is_noop() {
        let cache = Cache::new();
        cache.forget("styles", Utf8Path::new("/nowhere.less"));
        assert!(cache.is_empty());
        assert!(cache.recombine("styles").is_empty());
    }

    #[test]
    fn test_prune_drops_vanished_sources() {
        let (_dir, root) = sandbox();
        let cache = Cache::new();
        let a = root.join("a.less");
        let b = root.join("b.less");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        cache.get_or_compute("styles", &a, upper).unwrap();
        cache.get_or_compute("styles", &b, upper).unwrap();
        cache.prune("styles", std::slice::from_ref(&b));

        assert_eq!(cache.retained("styles"), vec![b]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_late_source_lands_in_path_order() {
        let (_dir, root) = sandbox();
        let cache = Cache::new();

        for name in ["c", "a", "b"] {
            let path = root.join(format!("{name}.less"));
            fs::write(&path, name).unwrap();
            cache.get_or_compute("styles", &path, upper).unwrap();
        }

        assert_eq!(
            cache.retained("styles"),
            ["a", "b", "c"].map(|name| root.join(format!("{name}.less")))
        );
        assert_eq!(cache.recombine("styles"), b"A\nB\nC\n");
    }
}
