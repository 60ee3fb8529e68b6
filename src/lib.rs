#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod cache;
mod config;
mod core;
pub mod engine;
mod error;
mod output;
pub mod stages;
pub mod utils;

use std::sync::mpsc::Sender;
use std::time::Instant;

pub use crate::blueprint::{Blueprint, TaskDef};
pub use crate::cache::{Artifact, Cache, Fetched};
pub use crate::config::{Manifest, Paths};
pub use crate::core::{Environment, Mode, TaskContext};
pub use crate::engine::{
    Category, DevLoop, Diagnostics, ExecutionPlan, FileChange, Notification, RunOutcome,
};
pub use crate::error::*;
pub use crate::output::{Output, OutputData};

use crate::engine::{Registry, WatchBinding};

/// Output directories that `clean` can remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    Dev,
    Rev,
    Dist,
    /// Both production directories, `.rev` and `.dist`.
    Build,
    All,
}

impl CleanTarget {
    pub fn task(self) -> &'static str {
        match self {
            CleanTarget::Dev => "clean:dev",
            CleanTarget::Rev => "clean:rev",
            CleanTarget::Dist => "clean:dist",
            CleanTarget::Build => "clean",
            CleanTarget::All => "clean:all",
        }
    }
}

/// The explicit context of one build process: configuration, the incremental
/// cache, the task registry and the watch bindings. Built once and passed by
/// reference to everything that needs it.
pub struct Pipeline {
    pub(crate) env: Environment,
    pub(crate) cache: Cache,
    pub(crate) registry: Registry,
    pub(crate) bindings: Vec<WatchBinding>,
}

impl Pipeline {
    /// The standard front-end pipeline: scripts, stylesheets, sprites,
    /// markup and images, with a production build and a development loop.
    pub fn frontend(env: Environment) -> Result<Self, GraphError> {
        let mut config = Blueprint::new();
        stages::install(&mut config, &env.manifest)?;
        Ok(config.finish(env))
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Resolves the execution plan of a task without running it.
    pub fn plan(&self, task: &str) -> Result<ExecutionPlan, GraphError> {
        self.registry.resolve(task)
    }

    /// Resolves and runs a task, returning once every phase completed or at
    /// the first failure.
    pub fn run(&self, task: &str) -> Result<Diagnostics, BuildError> {
        let plan = self.plan(task)?;
        tracing::debug!("plan for {task}:\n{plan}");
        engine::runner::run(self, &plan)
    }

    /// Runs the production build.
    pub fn build(&self) -> Result<Diagnostics, BuildError> {
        let s = Instant::now();
        let diagnostics = self.run("build")?;
        tracing::info!(
            "built {} into {} {}",
            self.env.paths.root,
            self.env.paths.dist,
            utils::as_overhead(s)
        );
        Ok(diagnostics)
    }

    pub fn clean(&self, target: CleanTarget) -> Result<Diagnostics, BuildError> {
        self.run(target.task())
    }

    /// A development loop driven by the caller, reporting successful runs
    /// on `notify`.
    pub fn dev_loop(&self, notify: Sender<Notification>) -> DevLoop<'_> {
        DevLoop::new(self, notify)
    }

    /// Runs the initial development build and then watches the sources,
    /// rebuilding incrementally until the process is stopped.
    #[cfg(feature = "live")]
    pub fn dev(&self) -> Result<(), KumitateError> {
        engine::runner::watch(self)?;
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("env", &self.env)
            .field("tasks", &self.registry.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
