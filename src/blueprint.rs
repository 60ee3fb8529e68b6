use std::any::type_name;
use std::sync::Arc;

use crate::engine::{Category, Composition, Registry, WatchBinding};
use crate::error::GraphError;
use crate::output::Output;
use crate::{Cache, Environment, Pipeline, TaskContext};

/// The blueprint of a build pipeline.
///
/// `Blueprint` is used to declare named tasks and how they are composed, and
/// which source globs should re-run which tasks in the development loop.
/// Once configured, turn it into a [`Pipeline`] with [`Blueprint::finish`].
///
/// # Example
///
/// ```rust,no_run
/// use kumitate::{Blueprint, Environment, Mode, Output};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut config = Blueprint::new();
///
/// config
///     .task()
///     .name("hello")
///     .run(|ctx| Ok(vec![Output::text(ctx.env.paths.dev.join("hello.txt"), "hi")]))?;
///
/// config.task().name("default").sequence(["hello"])?;
///
/// let pipeline = config.finish(Environment::load(".", Mode::Build)?);
/// pipeline.run("default")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Blueprint {
    pub(crate) registry: Registry,
    pub(crate) bindings: Vec<WatchBinding>,
}

impl Blueprint {
    /// Creates a new, empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self, env: Environment) -> Pipeline {
        Pipeline {
            env,
            cache: Cache::new(),
            registry: self.registry,
            bindings: self.bindings,
        }
    }

    /// The entry point for declaring a task.
    pub fn task(&mut self) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: None,
            dependencies: Vec::new(),
        }
    }

    /// Re-runs `tasks` whenever a file matching `pattern` changes. The pattern
    /// is a glob relative to the project root.
    pub fn watch<I, S>(&mut self, pattern: impl Into<String>, category: Category, tasks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bindings.push(WatchBinding {
            pattern: pattern.into(),
            tasks: tasks.into_iter().map(Into::into).collect(),
            category,
        });
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Option<String>,
    dependencies: Vec<String>,
}

impl<'a> TaskDef<'a> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tasks that must complete before this one starts.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Registers a leaf task. Unnamed leaves are named after the callback type.
    pub fn run<F>(self, callback: F) -> Result<(), GraphError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<Vec<Output>> + Send + Sync + 'static,
    {
        let name = self.name.unwrap_or_else(|| type_name::<F>().to_owned());

        self.blueprint.registry.register(
            name,
            Composition::Leaf(Arc::new(callback)),
            self.dependencies,
        )
    }

    /// Registers a task whose members run strictly one after another.
    pub fn sequence<I, S>(self, members: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.composite(Composition::Sequence(members))
    }

    /// Registers a task whose members may run concurrently.
    pub fn parallel<I, S>(self, members: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.composite(Composition::Parallel(members))
    }

    fn composite(self, composition: Composition) -> Result<(), GraphError> {
        let name = match self.name {
            Some(name) => name,
            None => format!("{:?}", composition),
        };

        self.blueprint
            .registry
            .register(name, composition, self.dependencies)
    }
}
