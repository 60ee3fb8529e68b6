use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::{Artifact, Cache, Fetched};
use crate::config::{Manifest, Paths};
use crate::error::{CacheError, ConfigError};

/// A 32-byte BLAKE3 hash used for change detection and revisioned filenames.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// The leading eight hex digits, used as the revision suffix.
    pub(crate) fn short(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time production build.
    Build,
    /// The continuous development loop.
    Watch,
}

/// Configuration resolved once per process and shared by every task.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current run mode.
    pub mode: Mode,
    /// Source and output directories of the selected project.
    pub paths: Paths,
    /// Third-party script dependencies bundled into `vendor.js`.
    pub manifest: Manifest,
}

impl Environment {
    pub fn new(mode: Mode, paths: Paths, manifest: Manifest) -> Self {
        Self {
            mode,
            paths,
            manifest,
        }
    }

    /// Resolves the project rooted at `root`: the root is canonicalized and
    /// `package.json` is read from it when present.
    pub fn load(root: impl AsRef<Utf8Path>, mode: Mode) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize_utf8()
            .map_err(|source| ConfigError::Root {
                path: root.to_owned(),
                source,
            })?;

        let paths = Paths::new(canonical);
        let manifest = Manifest::load(&paths.root.join("package.json"))?;

        Ok(Self::new(mode, paths, manifest))
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// Access to global configuration.
    pub env: &'a Environment,
    /// The process-wide incremental cache.
    pub cache: &'a Cache,
    /// Name of the running task, also the namespace of its cache entries.
    pub name: &'a str,
}

impl TaskContext<'_> {
    /// Looks up the artifact for `path` under this task's namespace,
    /// recomputing it when the file content changed.
    pub fn cached<F>(&self, path: &Utf8Path, compute: F) -> Result<Artifact, CacheError>
    where
        F: FnOnce(&[u8]) -> anyhow::Result<Vec<u8>>,
    {
        self.cache.get_or_compute(self.name, path, compute)
    }

    /// Like [`TaskContext::cached`], also reporting whether `compute` ran.
    pub fn fetch<F>(&self, path: &Utf8Path, compute: F) -> Result<Fetched, CacheError>
    where
        F: FnOnce(&[u8]) -> anyhow::Result<Vec<u8>>,
    {
        self.cache.fetch(self.name, path, compute)
    }

    /// Maps a source file to the same relative location under `target`.
    pub fn mirror(&self, source: &Utf8Path, target: &Utf8Path) -> anyhow::Result<Utf8PathBuf> {
        let relative = source.strip_prefix(&self.env.paths.src)?;
        Ok(target.join(relative))
    }
}
