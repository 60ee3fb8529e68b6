use std::fs;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use kumitate::{CleanTarget, Environment, Mode, Paths, Pipeline};

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct Args {
    /// Build `<base>/projects/<name>` instead of the base directory.
    #[clap(long, global = true)]
    project: Option<String>,

    /// Directory holding the project, or the `projects/` collection.
    #[clap(long, global = true, default_value = ".")]
    base: Utf8PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Production build into `.dist`.
    Build {
        /// Write the executed plan as a Mermaid diagram.
        #[clap(long)]
        mermaid: Option<Utf8PathBuf>,
    },
    /// Development build into `.dev`, then rebuild on change.
    Dev,
    /// Remove build output.
    Clean {
        #[clap(value_enum, default_value = "all")]
        target: Target,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Target {
    Dev,
    Rev,
    Dist,
    /// `.rev` and `.dist`.
    Build,
    All,
}

impl From<Target> for CleanTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Dev => CleanTarget::Dev,
            Target::Rev => CleanTarget::Rev,
            Target::Dist => CleanTarget::Dist,
            Target::Build => CleanTarget::Build,
            Target::All => CleanTarget::All,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    kumitate::utils::init_logging()?;

    let mode = match args.command {
        Command::Dev => Mode::Watch,
        _ => Mode::Build,
    };

    let root = Paths::select(&args.base, args.project.as_deref());
    let env = Environment::load(root, mode)?;
    let pipeline = Pipeline::frontend(env)?;

    match args.command {
        Command::Build { mermaid } => {
            let diagnostics = pipeline.build()?;

            if let Some(path) = mermaid {
                let plan = pipeline.plan("build")?;
                fs::write(&path, diagnostics.render_mermaid(&plan))?;
                tracing::info!("wrote build diagram to {path}");
            }
        }
        Command::Dev => pipeline.dev()?,
        Command::Clean { target } => {
            pipeline.clean(target.into())?;
        }
    }

    Ok(())
}
