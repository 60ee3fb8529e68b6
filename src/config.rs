//! Project layout and the vendor dependency manifest.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Directory layout of a single project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Project root, all watch patterns are relative to it.
    pub root: Utf8PathBuf,
    /// Source root, `<root>/src`.
    pub src: Utf8PathBuf,
    /// Unminified development output, `<root>/.dev`.
    pub dev: Utf8PathBuf,
    /// Minified output awaiting revisioning, `<root>/.rev`.
    pub rev: Utf8PathBuf,
    /// Revisioned distribution output, `<root>/.dist`.
    pub dist: Utf8PathBuf,
    /// Installed third-party packages, `<root>/node_modules`.
    pub modules: Utf8PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        Self {
            src: root.join("src"),
            dev: root.join(".dev"),
            rev: root.join(".rev"),
            dist: root.join(".dist"),
            modules: root.join("node_modules"),
            root,
        }
    }

    /// Picks the project root: `<base>/projects/<name>` when a project name is
    /// given, `base` itself otherwise.
    pub fn select(base: &Utf8Path, project: Option<&str>) -> Utf8PathBuf {
        match project {
            Some(name) => base.join("projects").join(name),
            None => base.to_owned(),
        }
    }
}

/// The `dependencies` table of `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Reads the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::ManifestRead {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Manifest {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dependencies: names
                .into_iter()
                .map(|name| (name.into(), "*".to_owned()))
                .collect(),
        }
    }

    /// Dependency names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
