//! Production minification, from the dev output into the revisioning input.
//!
//! Inputs missing from the dev output are skipped, not reported.

use std::fs;
use std::sync::LazyLock;

use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use regex::Regex;

use crate::TaskContext;
use crate::output::Output;

static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--[^\[].*?-->").expect("Error compiling comment pattern")
});

static PREFORMATTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(/?)(?:pre|textarea)\b").expect("Error compiling preformatted pattern")
});

pub(crate) fn css(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    each(ctx, &["app.css"], |bytes| {
        let source = std::str::from_utf8(bytes)?;
        let options = grass::Options::default().style(grass::OutputStyle::Compressed);
        let css = grass::from_string(source.to_owned(), &options)
            .map_err(|e| anyhow::anyhow!("Couldn't minify app.css: {e}"))?;
        Ok(css.into_bytes())
    })
}

pub(crate) fn js(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    each(ctx, &["app.js", "vendor.js"], |bytes| {
        Ok(strip_script(std::str::from_utf8(bytes)?).into_bytes())
    })
}

pub(crate) fn html(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    each(ctx, &["index.html"], |bytes| {
        Ok(strip_markup(std::str::from_utf8(bytes)?).into_bytes())
    })
}

pub(crate) fn images(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    each(ctx, &["sprites.png"], recompress)
}

fn each<F>(ctx: &TaskContext, names: &[&str], transform: F) -> anyhow::Result<Vec<Output>>
where
    F: Fn(&[u8]) -> anyhow::Result<Vec<u8>>,
{
    let paths = &ctx.env.paths;
    let mut outputs = Vec::new();

    for name in names {
        let source = paths.dev.join(name);
        if !source.is_file() {
            tracing::debug!("{source} not built, skipping");
            continue;
        }

        let data = transform(&fs::read(&source)?)?;
        outputs.push(Output::binary(paths.rev.join(name), data));
    }

    Ok(outputs)
}

/// Trims and drops lines, except inside blocks where whitespace is content.
/// `track` reports whether such a block is still open after the line, given
/// whether it was open before it.
fn strip_lines(
    source: &str,
    mut track: impl FnMut(&str, bool) -> bool,
    comment: impl Fn(&str) -> bool,
) -> String {
    let mut open = false;
    let mut kept = Vec::new();

    for line in source.lines() {
        let before = open;
        open = track(line, before);

        let line = match (before, open) {
            (false, false) => line.trim(),
            (false, true) => line.trim_start(),
            (true, false) => line.trim_end(),
            (true, true) => line,
        };

        if !before && !open && (line.is_empty() || comment(line)) {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n")
}

/// Whether a template literal is open after `line`.
fn template_open(line: &str, open: bool) -> bool {
    if !open && line.trim_start().starts_with("//") {
        return false;
    }

    let mut escaped = false;
    let mut toggles = 0;
    for c in line.chars() {
        match c {
            '\\' if !escaped => {
                escaped = true;
                continue;
            }
            '`' if !escaped => toggles += 1,
            _ => {}
        }
        escaped = false;
    }

    open ^ (toggles % 2 == 1)
}

/// Whether a `<pre>` or `<textarea>` element is open after `line`.
fn preformatted_open(line: &str, open: bool) -> bool {
    PREFORMATTED
        .captures_iter(line)
        .last()
        .map_or(open, |tag| tag[1].is_empty())
}

/// Drops indentation, blank lines and whole-line `//` comments. Line breaks
/// are kept, so automatic semicolon insertion is unaffected. Lines inside a
/// template literal are left as they are.
pub fn strip_script(source: &str) -> String {
    strip_lines(source, template_open, |line| line.starts_with("//"))
}

/// Drops HTML comments (conditional comments are kept), indentation and
/// blank lines. The content of `<pre>` and `<textarea>` is left alone.
pub fn strip_markup(source: &str) -> String {
    let source = HTML_COMMENT.replace_all(source, "");
    strip_lines(&source, preformatted_open, |_| false)
}

/// Re-encodes a PNG with the strongest compression, keeping the original
/// when that does not make it smaller.
fn recompress(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let image = image::load_from_memory(bytes)?;

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
        .write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )?;

    if out.len() < bytes.len() {
        Ok(out)
    } else {
        Ok(bytes.to_vec())
    }
}
