//! Content-hash revisioning of the production output.
//!
//! Every file is renamed to `<stem>-<hash>.<ext>`, where the hash is taken
//! from the file content before any reference is rewritten. References to
//! renamed files are then replaced in the text files, so the page keeps
//! pointing at the right assets.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::TaskContext;
use crate::core::Hash32;
use crate::output::Output;
use crate::stages::expand;

/// Files to leave alone while revisioning, matched against either the path
/// relative to the revisioned directory or the bare file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionOptions {
    /// Files that keep their name, usually the entry page.
    pub dont_rename: Vec<String>,
    /// Files whose content is never searched for references.
    pub dont_search: Vec<String>,
}

impl Default for RevisionOptions {
    fn default() -> Self {
        Self {
            dont_rename: vec!["index.html".into()],
            dont_search: vec!["vendor.js".into()],
        }
    }
}

fn exempt(list: &[String], path: &Utf8Path) -> bool {
    list.iter()
        .any(|entry| path.as_str() == entry.as_str() || path.file_name() == Some(entry.as_str()))
}

/// The revisioned name of a file: `app.js` becomes `app-1a2b3c4d.js`.
pub fn revisioned_name(path: &Utf8Path, data: &[u8]) -> Utf8PathBuf {
    let hash = Hash32::hash(data).short();
    let stem = path.file_stem().unwrap_or_default();

    let name = match path.extension() {
        Some(ext) => format!("{stem}-{hash}.{ext}"),
        None => format!("{stem}-{hash}"),
    };

    path.with_file_name(name)
}

/// Renames and rewrites a set of files given by their relative paths.
pub fn revision(
    files: Vec<(Utf8PathBuf, Vec<u8>)>,
    options: &RevisionOptions,
) -> Vec<(Utf8PathBuf, Vec<u8>)> {
    let mut renames = files
        .iter()
        .filter(|(path, _)| !exempt(&options.dont_rename, path))
        .map(|(path, data)| (path.to_string(), revisioned_name(path, data).into_string()))
        .collect::<Vec<_>>();

    // `img/a.png` must win over `a.png` at the same position
    renames.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    files
        .into_iter()
        .map(|(path, data)| {
            let data = match std::str::from_utf8(&data) {
                Ok(text) if !exempt(&options.dont_search, &path) => {
                    rewrite(text, &renames).into_bytes()
                }
                _ => data,
            };

            let path = match renames.iter().find(|(old, _)| old.as_str() == path.as_str()) {
                Some((_, new)) => Utf8PathBuf::from(new),
                None => path,
            };

            (path, data)
        })
        .collect()
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.')
}

/// Replaces every whole-name occurrence in a single left to right pass, so
/// replacements are never matched again.
fn rewrite(text: &str, renames: &[(String, String)]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        if i == 0 || !is_name_byte(bytes[i - 1]) {
            let found = renames.iter().find(|(old, _)| {
                bytes[i..].starts_with(old.as_bytes())
                    && bytes
                        .get(i + old.len())
                        .is_none_or(|&next| !is_name_byte(next))
            });

            if let Some((old, new)) = found {
                out.push_str(&text[last..i]);
                out.push_str(new);
                i += old.len();
                last = i;
                continue;
            }
        }

        i += 1;
    }

    out.push_str(&text[last..]);
    out
}

pub(crate) fn rev(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;

    let mut files = Vec::new();
    for path in expand(&paths.rev, "**/*")? {
        let data = fs::read(&path)?;
        files.push((path.strip_prefix(&paths.rev)?.to_owned(), data));
    }

    let outputs = revision(files, &RevisionOptions::default())
        .into_iter()
        .map(|(path, data)| Output::binary(paths.dist.join(path), data))
        .collect::<Vec<_>>();

    tracing::debug!(count = outputs.len(), "revisioned files");
    Ok(outputs)
}
