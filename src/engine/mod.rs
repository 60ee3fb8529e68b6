mod devloop;
mod plan;
mod registry;
pub(crate) mod runner;

use std::sync::Arc;

use crate::TaskContext;
use crate::output::Output;

pub use devloop::{
    Category, DevLoop, FileChange, Notification, ReloadAction, RunOutcome, WatchBinding,
    WatchState, live_reload_script,
};
pub use plan::{ExecutionPlan, Phase};
pub use registry::Registry;
pub use runner::{Diagnostics, TaskExecution};

/// The work a leaf task performs. Returning `Ok` hands the produced files to
/// the scheduler, `Err` marks the task as failed.
pub type Action = Arc<dyn Fn(&TaskContext) -> anyhow::Result<Vec<Output>> + Send + Sync>;

/// How a task is made up.
#[derive(Clone)]
pub enum Composition {
    /// A single unit of work.
    Leaf(Action),
    /// Members run strictly one after another.
    Sequence(Vec<String>),
    /// Members may run concurrently.
    Parallel(Vec<String>),
}

impl Composition {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Composition::Leaf(_))
    }

    /// Tasks referenced by the composition itself.
    pub fn members(&self) -> &[String] {
        match self {
            Composition::Leaf(_) => &[],
            Composition::Sequence(members) | Composition::Parallel(members) => members,
        }
    }
}

impl std::fmt::Debug for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Composition::Leaf(_) => f.write_str("Leaf"),
            Composition::Sequence(members) => f.debug_tuple("Sequence").field(members).finish(),
            Composition::Parallel(members) => f.debug_tuple("Parallel").field(members).finish(),
        }
    }
}

/// A named unit of work in the registry.
#[derive(Debug, Clone)]
pub struct Task {
    pub(crate) name: String,
    pub(crate) composition: Composition,
    /// Tasks that must complete before this one starts. For composite tasks
    /// they form a parallel prelude to the composition.
    pub(crate) dependencies: Vec<String>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Every task this one refers to, through dependencies or membership.
    pub(crate) fn references(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .iter()
            .chain(self.composition.members())
    }
}
