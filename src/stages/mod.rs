//! The standard front-end stages and the task table wiring them together.
//!
//! | task             | composition                                       |
//! |------------------|---------------------------------------------------|
//! | `build`          | `clean` → `application` → `minify` → `rev`        |
//! | `dev`            | `clean:dev` → `dev:compile` → `styles`            |
//! | `application`    | `js` ∥ `html` ∥ `images` ∥ `styles`               |
//! | `styles`         | leaf, after `styles:compile`, after `sprites`     |

mod clean;
mod images;
mod markup;
mod minify;
mod revision;
mod scripts;
mod sprites;
mod styles;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::Blueprint;
use crate::config::Manifest;
use crate::engine::Category;
use crate::error::GraphError;

pub use minify::{strip_markup, strip_script};
pub use revision::{RevisionOptions, revision, revisioned_name};
pub use scripts::ScriptError;
pub use sprites::{Sprite, SpriteSheet};
pub use styles::StyleError;

pub(crate) const SCRIPT_SOURCES: &str = "src/**/*.js";
pub(crate) const TEMPLATE_SOURCES: &str = "src/modules/**/template.html";
pub(crate) const MARKUP_SOURCES: &str = "src/index.html";
pub(crate) const STYLE_SOURCES: &str = "src/**/*.less";
pub(crate) const RASTER_SOURCES: [&str; 3] = ["src/**/*.png", "src/**/*.jpg", "src/**/*.gif"];
pub(crate) const IMAGE_SOURCES: [&str; 4] =
    ["src/**/*.png", "src/**/*.jpg", "src/**/*.gif", "src/**/*.svg"];

/// Registers every standard task and watch binding.
pub fn install(config: &mut Blueprint, manifest: &Manifest) -> Result<(), GraphError> {
    config
        .task()
        .name("clean:dev")
        .run(|ctx| clean::remove(&ctx.env.paths.dev))?;
    config
        .task()
        .name("clean:rev")
        .run(|ctx| clean::remove(&ctx.env.paths.rev))?;
    config
        .task()
        .name("clean:dist")
        .run(|ctx| clean::remove(&ctx.env.paths.dist))?;

    config.task().name("js:vendor").run(scripts::vendor)?;
    config.task().name("js:app").run(scripts::app)?;
    config.task().name("html").run(markup::passthrough)?;
    config.task().name("images").run(images::copy)?;
    config.task().name("sprites").run(sprites::generate)?;

    config
        .task()
        .name("styles:compile")
        .depends_on(["sprites"])
        .run(styles::compile)?;
    config
        .task()
        .name("styles")
        .depends_on(["styles:compile"])
        .run(styles::concat)?;

    config.task().name("minify:css").run(minify::css)?;
    config.task().name("minify:html").run(minify::html)?;
    config.task().name("minify:js").run(minify::js)?;
    config.task().name("minify:images").run(minify::images)?;
    config.task().name("rev").run(revision::rev)?;

    config.task().name("clean").parallel(["clean:rev", "clean:dist"])?;
    config
        .task()
        .name("clean:all")
        .parallel(["clean:dev", "clean:rev", "clean:dist"])?;
    config.task().name("js").parallel(["js:vendor", "js:app"])?;
    config
        .task()
        .name("application")
        .parallel(["js", "html", "images", "styles"])?;
    config
        .task()
        .name("minify")
        .parallel(["minify:css", "minify:html", "minify:js", "minify:images"])?;
    config
        .task()
        .name("build")
        .sequence(["clean", "application", "minify", "rev"])?;

    config
        .task()
        .name("dev:compile")
        .parallel(["js:vendor", "js:app", "html", "images"])?;
    config
        .task()
        .name("dev")
        .sequence(["clean:dev", "dev:compile", "styles"])?;

    for name in manifest.names() {
        config.watch(
            format!("node_modules/{}/**/*.js", Pattern::escape(name)),
            Category::Script,
            ["js:vendor"],
        );
    }
    config.watch(SCRIPT_SOURCES, Category::Script, ["js:app"]);
    config.watch(TEMPLATE_SOURCES, Category::Script, ["js:app"]);
    config.watch(MARKUP_SOURCES, Category::Markup, ["html"]);
    for pattern in IMAGE_SOURCES {
        config.watch(pattern, Category::Image, ["images", "sprites"]);
    }
    config.watch(STYLE_SOURCES, Category::Style, ["styles:compile"]);

    Ok(())
}

/// Expands a glob relative to `root` into the matching files, sorted.
pub(crate) fn expand(root: &Utf8Path, pattern: &str) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let pattern = format!("{}/{pattern}", Pattern::escape(root.as_str()));

    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }

        match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => paths.push(path),
            Err(path) => tracing::warn!("skipping non UTF-8 path {}", path.display()),
        }
    }

    paths.sort();
    Ok(paths)
}

/// Expands several globs, merging the results in sorted order.
pub(crate) fn expand_all(root: &Utf8Path, patterns: &[&str]) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        paths.extend(expand(root, pattern)?);
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}
