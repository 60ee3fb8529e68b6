use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

/// Progress bar of a whole plan.
pub(crate) static STYLE_BUILD: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

/// Spinner of a single running task.
pub(crate) static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .expect("Error setting progress bar template")
});

/// Time elapsed since `s`, formatted as a coloured `(+Nms)` suffix.
pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Installs the global `tracing` subscriber. Log lines are written through the
/// progress bar layer so that they never tear the bars apart. The filter is
/// read from `RUST_LOG` and defaults to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}
