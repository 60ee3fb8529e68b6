use std::fs;

use crate::TaskContext;
use crate::output::Output;
use crate::stages::{MARKUP_SOURCES, expand};

/// Copies the page markup into the dev output unchanged.
pub(crate) fn passthrough(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;

    expand(&paths.root, MARKUP_SOURCES)?
        .into_iter()
        .map(|source| -> anyhow::Result<Output> {
            let data = fs::read(&source)?;
            Ok(Output::binary(ctx.mirror(&source, &paths.dev)?, data))
        })
        .collect()
}
