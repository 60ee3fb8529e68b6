use std::fs;
use std::time::Instant;

use anyhow::Context;
use camino::Utf8Path;

use crate::output::Output;
use crate::utils::as_overhead;

/// Deletes an output directory if it exists.
pub(crate) fn remove(dir: &Utf8Path) -> anyhow::Result<Vec<Output>> {
    let s = Instant::now();

    if fs::metadata(dir).is_ok() {
        fs::remove_dir_all(dir).with_context(|| format!("Couldn't remove {dir}"))?;
        tracing::info!("Cleaned {dir} {}", as_overhead(s));
    }

    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn test_remove_existing_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let dev = root.join(".dev");
        fs::create_dir_all(dev.join("img")).unwrap();
        fs::write(dev.join("img/a.png"), "x").unwrap();

        remove(&dev).unwrap();
        assert!(!dev.exists());

        // already gone
        assert!(remove(&dev).unwrap().is_empty());
    }
}
