//! Files produced by stage actions.
//!
//! A stage never writes to disk itself. It returns a list of [`Output`]s and
//! the scheduler persists them once the action reported success, so a failed
//! transform leaves the previous output in place.

use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// The content of an [`Output`] file.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum OutputData {
    /// Text content (UTF-8).
    Utf8(String),
    /// Binary content (raw bytes).
    Binary(Vec<u8>),
}

impl AsRef<[u8]> for OutputData {
    fn as_ref(&self) -> &[u8] {
        match self {
            OutputData::Utf8(s) => s.as_bytes(),
            OutputData::Binary(b) => b.as_slice(),
        }
    }
}

/// A single file to be written, with its absolute destination.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Output {
    /// The destination path of the file.
    pub path: Utf8PathBuf,
    /// The content of the file to be written.
    pub data: OutputData,
}

impl Output {
    pub fn text(path: impl Into<Utf8PathBuf>, data: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Utf8(data.into()),
        }
    }

    pub fn binary(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Binary(data.into()),
        }
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => {}
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Writes every output, creating parent directories as needed.
pub(crate) fn save_outputs(outputs: &[Output]) -> io::Result<()> {
    for output in outputs {
        if let Some(parent_dir) = output.path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        fs::write(&output.path, &output.data)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Utf8Path::new("/p/src/modules/nav/../shared/./util.js")),
            Utf8Path::new("/p/src/modules/shared/util.js")
        );
        assert_eq!(normalize_path(Utf8Path::new("../a/b")), Utf8Path::new("../a/b"));
        assert_eq!(normalize_path(Utf8Path::new("a/../../b")), Utf8Path::new("../b"));
    }

    #[test]
    fn test_save_outputs_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let outputs = [
            Output::text(root.join(".dev/app.css"), ".a{}"),
            Output::binary(root.join(".dev/img/logo.png"), vec![1, 2, 3]),
        ];
        save_outputs(&outputs).unwrap();

        assert_eq!(fs::read_to_string(root.join(".dev/app.css")).unwrap(), ".a{}");
        assert_eq!(fs::read(root.join(".dev/img/logo.png")).unwrap(), [1, 2, 3]);
    }
}
