use std::collections::HashMap;
use std::fmt;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::error::GraphError;

/// Tasks in a phase share no ordering constraint and may run concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phase {
    pub(crate) tasks: Vec<String>,
}

impl Phase {
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }
}

/// An ordered list of phases of leaf tasks. Phase `k + 1` never starts before
/// every task of phase `k` completed successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub(crate) phases: Vec<Phase>,
}

/// Ordering constraints between leaf tasks. An edge `a -> b` means `b` may
/// only start once `a` completed.
#[derive(Debug, Default)]
pub(crate) struct Precedence<'a> {
    graph: DiGraphMap<&'a str, ()>,
    order: Vec<&'a str>,
}

impl<'a> Precedence<'a> {
    pub(crate) fn leaf(&mut self, name: &'a str) {
        if !self.graph.contains_node(name) {
            self.graph.add_node(name);
            self.order.push(name);
        }
    }

    /// Every task of `before` precedes every task of `after`.
    pub(crate) fn chain(&mut self, before: &[&'a str], after: &[&'a str]) {
        for &a in before {
            for &b in after {
                if a != b {
                    self.graph.add_edge(a, b, ());
                }
            }
        }
    }

    /// Places every leaf in the earliest phase after all of its predecessors.
    /// Within a phase leaves keep the order in which they were first seen.
    /// Constraints that contradict each other are reported as a cycle.
    pub(crate) fn layer(&self) -> Result<ExecutionPlan, GraphError> {
        let sorted = toposort(&self.graph, None)
            .map_err(|cycle| GraphError::Cycle(cycle.node_id().to_owned()))?;

        let mut depth: HashMap<&str, usize> = HashMap::new();
        for node in sorted {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|before| depth[before] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        let count = depth.values().max().map_or(0, |deepest| deepest + 1);
        let mut phases = vec![Phase::default(); count];
        for name in &self.order {
            phases[depth[name]].tasks.push((*name).to_owned());
        }

        Ok(ExecutionPlan { phases })
    }
}

impl ExecutionPlan {
    #[cfg(test)]
    pub(crate) fn from_raw(phases: Vec<Vec<String>>) -> Self {
        Self {
            phases: phases.into_iter().map(|tasks| Phase { tasks }).collect(),
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Every leaf in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().map(String::as_str))
    }

    /// Index of the phase containing `task`.
    pub fn position(&self, task: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.tasks.iter().any(|t| t == task))
    }

    pub fn contains(&self, task: &str) -> bool {
        self.position(task).is_some()
    }

    /// Total number of leaves.
    pub fn len(&self) -> usize {
        self.phases.iter().map(|phase| phase.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, phase) in self.phases.iter().enumerate() {
            writeln!(f, "{}: {}", index + 1, phase.tasks.join(", "))?;
        }
        Ok(())
    }
}
