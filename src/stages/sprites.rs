//! Sprite sheet generation.
//!
//! Raster images are stacked top-down into a single sheet. The generated
//! stylesheet positions and scales the sheet in percentages, so every
//! `.sprite-<name>` element scales with its container.

use std::fmt::Write;
use std::io::Cursor;

use anyhow::Context;
use camino::Utf8Path;
use image::{ImageFormat, Rgba, RgbaImage};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::TaskContext;
use crate::output::Output;
use crate::stages::{RASTER_SOURCES, expand_all};

const SHEET: &str = "sprites.png";

/// A sprite's position and size within the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sprite {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpriteSheet {
    pub width: u32,
    pub height: u32,
    pub sprites: Vec<Sprite>,
}

impl SpriteSheet {
    /// Places sprites one below another, in the given order, left aligned.
    pub fn stack<'a>(sizes: impl IntoIterator<Item = (&'a str, u32, u32)>) -> Self {
        let mut sheet = SpriteSheet::default();

        for (name, width, height) in sizes {
            sheet.sprites.push(Sprite {
                name: name.to_owned(),
                x: 0,
                y: sheet.height,
                width,
                height,
            });
            sheet.width = sheet.width.max(width);
            sheet.height += height;
        }

        sheet
    }

    /// One rule per sprite, with the sheet offset and scale expressed
    /// relative to the sprite's own size.
    pub fn stylesheet(&self, image: &str) -> String {
        let mut css = String::new();

        for sprite in &self.sprites {
            let _ = writeln!(
                css,
                ".sprite-{name} {{\n  background-image: url('{image}');\n  background-position: {x}% {y}%;\n  background-size: {w}% {h}%;\n  width: 100%;\n  height: 100%;\n}}",
                name = sprite.name,
                x = percent(sprite.x, sprite.width),
                y = percent(sprite.y, sprite.height),
                w = percent(self.width, sprite.width),
                h = percent(self.height, sprite.height),
            );
        }

        css
    }
}

/// `100 * value / size`, printed with at most four decimals.
fn percent(value: u32, size: u32) -> String {
    if size == 0 {
        return "0".to_owned();
    }

    let formatted = format!("{:.4}", 100.0 * f64::from(value) / f64::from(size));
    match formatted.trim_end_matches('0').trim_end_matches('.') {
        "" => "0".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

pub(crate) fn generate(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;
    let sources = expand_all(&paths.root, &RASTER_SOURCES)?;

    if sources.is_empty() {
        return Ok(vec![Output::text(paths.dev.join("sprites.css"), String::new())]);
    }

    let images = sources
        .par_iter()
        .map(|path| load(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let sheet = SpriteSheet::stack(
        images
            .iter()
            .map(|(name, image)| (name.as_str(), image.width(), image.height())),
    );

    let mut canvas = RgbaImage::from_pixel(sheet.width, sheet.height, Rgba([0, 0, 0, 0]));
    for (sprite, (_, image)) in sheet.sprites.iter().zip(&images) {
        image::imageops::replace(&mut canvas, image, i64::from(sprite.x), i64::from(sprite.y));
    }

    let mut png = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    tracing::debug!(count = sheet.sprites.len(), "packed sprite sheet");

    Ok(vec![
        Output::binary(paths.dev.join(SHEET), png),
        Output::text(paths.dev.join("sprites.css"), sheet.stylesheet(SHEET)),
    ])
}

fn load(path: &Utf8Path) -> anyhow::Result<(String, RgbaImage)> {
    let name = path.file_stem().unwrap_or_default().to_owned();
    let image = image::open(path)
        .with_context(|| format!("Couldn't decode image {path}"))?
        .to_rgba8();

    Ok((name, image))
}
