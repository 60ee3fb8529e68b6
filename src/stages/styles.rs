//! Stylesheet compilation.
//!
//! Each fragment is compiled on its own through the incremental cache, so an
//! edit recompiles exactly one file before the aggregate is recombined.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::TaskContext;
use crate::output::Output;
use crate::stages::{STYLE_SOURCES, expand};

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("Stylesheet {0} is not valid UTF-8")]
    Utf8(Utf8PathBuf, #[source] std::str::Utf8Error),

    #[error("Couldn't compile stylesheet {0}:\n{1}")]
    Sass(Utf8PathBuf, #[source] Box<grass::Error>),
}

/// Compiles every fragment under the source root into `tmp.css`, in path
/// order. A single failing fragment fails the whole task and leaves the
/// previous aggregate untouched.
pub(crate) fn compile(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;
    let sources = expand(&paths.root, STYLE_SOURCES)?;

    // forget fragments deleted while nobody was watching
    ctx.cache.prune(ctx.name, &sources);

    for path in &sources {
        ctx.cached(path, |bytes| compile_fragment(path, bytes))?;
    }

    let aggregate = ctx.cache.recombine(ctx.name);
    tracing::debug!(fragments = sources.len(), "recombined stylesheet");

    Ok(vec![Output::binary(paths.dev.join("tmp.css"), aggregate)])
}

/// Concatenates the compiled stylesheet and the sprite rules into `app.css`.
pub(crate) fn concat(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let dev = &ctx.env.paths.dev;
    let mut css = Vec::new();

    for part in ["tmp.css", "sprites.css"] {
        let path = dev.join(part);
        if !path.is_file() {
            continue;
        }

        css.extend(fs::read(&path)?);
        if !css.is_empty() && !css.ends_with(b"\n") {
            css.push(b'\n');
        }
    }

    Ok(vec![Output::binary(dev.join("app.css"), css)])
}

pub(crate) fn compile_fragment(path: &Utf8Path, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let source =
        std::str::from_utf8(bytes).map_err(|e| StyleError::Utf8(path.to_owned(), e))?;

    let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
    if let Some(dir) = path.parent() {
        options = options.load_path(dir);
    }

    let css = grass::from_string(source.to_owned(), &options)
        .map_err(|e| StyleError::Sass(path.to_owned(), e))?;

    Ok(css.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_fragment() {
        let css = compile_fragment(
            Utf8Path::new("/p/src/a.less"),
            b"$accent: red;\n.nav { a { color: $accent; } }\n",
        )
        .unwrap();
        let css = String::from_utf8(css).unwrap();

        assert!(css.contains(".nav a"));
        assert!(css.contains("color: red"));
    }

    #[test]
    fn test_syntax_error() {
        let error = compile_fragment(Utf8Path::new("/p/src/broken.less"), b".a { color: red; ")
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<StyleError>(),
            Some(StyleError::Sass(path, _)) if path == "/p/src/broken.less"
        ));
    }
}
