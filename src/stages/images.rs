use crate::TaskContext;
use crate::output::Output;
use crate::stages::{IMAGE_SOURCES, expand_all};

/// Copies source images into the dev output. Files whose content did not
/// change since the previous run, and whose copy still exists, are skipped.
pub(crate) fn copy(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;
    let sources = expand_all(&paths.root, &IMAGE_SOURCES)?;

    ctx.cache.prune(ctx.name, &sources);

    let mut outputs = Vec::new();
    for source in &sources {
        let target = ctx.mirror(source, &paths.dev)?;
        let fetched = ctx.fetch(source, |bytes| Ok(bytes.to_vec()))?;

        if fetched.recomputed || !target.exists() {
            outputs.push(Output::binary(target, fetched.artifact.to_vec()));
        }
    }

    tracing::debug!(copied = outputs.len(), total = sources.len(), "copied images");
    Ok(outputs)
}
