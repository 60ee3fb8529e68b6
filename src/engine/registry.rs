use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;

use crate::engine::plan::{ExecutionPlan, Precedence};
use crate::engine::{Composition, Task};
use crate::error::GraphError;

/// All tasks known to a pipeline, by name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task. Referenced names are checked when a plan is resolved, so
    /// tasks may be registered in any order.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        composition: Composition,
        dependencies: Vec<String>,
    ) -> Result<(), GraphError> {
        let name = name.into();

        if self.tasks.contains_key(&name) {
            return Err(GraphError::Duplicate(name));
        }

        self.order.push(name.clone());
        self.tasks.insert(
            name.clone(),
            Task {
                name,
                composition,
                dependencies,
            },
        );

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Produces the execution plan for a single task.
    pub fn resolve(&self, name: &str) -> Result<ExecutionPlan, GraphError> {
        self.resolve_many([name])
    }

    /// Produces one plan for several tasks, as if they were members of an
    /// anonymous parallel task.
    pub fn resolve_many<I, S>(&self, names: I) -> Result<ExecutionPlan, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        let graph = self.reachable(names.iter().map(|name| name.as_ref()))?;

        toposort(&graph, None).map_err(|cycle| GraphError::Cycle(cycle.node_id().to_owned()))?;

        let mut precedence = Precedence::default();
        let mut memo = HashMap::new();
        for name in &names {
            self.constrain(name.as_ref(), &mut precedence, &mut memo)?;
        }

        precedence.layer()
    }

    /// Builds the graph of every task reachable from `roots`, with an edge
    /// from each referenced task to the task referring to it.
    fn reachable<'a>(
        &'a self,
        roots: impl Iterator<Item = &'a str>,
    ) -> Result<DiGraphMap<&'a str, ()>, GraphError> {
        let mut graph = DiGraphMap::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for root in roots {
            let (name, _) = self
                .tasks
                .get_key_value(root)
                .ok_or_else(|| GraphError::Unknown(root.to_owned()))?;
            queue.push_back(name.as_str());
        }

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            graph.add_node(name);

            for reference in self.tasks[name].references() {
                let (reference, _) = self
                    .tasks
                    .get_key_value(reference.as_str())
                    .ok_or_else(|| GraphError::Unknown(reference.clone()))?;

                graph.add_edge(reference.as_str(), name, ());
                queue.push_back(reference.as_str());
            }
        }

        Ok(graph)
    }

    /// Records the ordering constraints of `name` and returns every leaf it
    /// runs, those of its dependencies included.
    ///
    /// Dependencies precede the task's own leaves, and the leaves of each
    /// sequence member precede those of the next member. A leaf already run
    /// by an earlier member is not constrained again.
    fn constrain<'a>(
        &'a self,
        name: &str,
        precedence: &mut Precedence<'a>,
        memo: &mut HashMap<&'a str, Vec<&'a str>>,
    ) -> Result<Vec<&'a str>, GraphError> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| GraphError::Unknown(name.to_owned()))?;

        if let Some(leaves) = memo.get(task.name.as_str()) {
            return Ok(leaves.clone());
        }

        let mut leaves = Vec::new();
        for dependency in &task.dependencies {
            let found = self.constrain(dependency, precedence, memo)?;
            extend_unique(&mut leaves, found);
        }

        let mut body = Vec::new();
        match &task.composition {
            Composition::Leaf(_) => {
                precedence.leaf(&task.name);
                body.push(task.name.as_str());
            }
            Composition::Sequence(members) => {
                let mut previous = Vec::new();
                for member in members {
                    let added = fresh(&body, self.constrain(member, precedence, memo)?);
                    if added.is_empty() {
                        continue;
                    }

                    precedence.chain(&previous, &added);
                    extend_unique(&mut body, added.iter().copied());
                    previous = added;
                }
            }
            Composition::Parallel(members) => {
                for member in members {
                    let found = self.constrain(member, precedence, memo)?;
                    extend_unique(&mut body, found);
                }
            }
        }

        let body = fresh(&leaves, body);
        precedence.chain(&leaves, &body);
        extend_unique(&mut leaves, body);

        memo.insert(task.name.as_str(), leaves.clone());
        Ok(leaves)
    }

    /// Closure of `names` under "is a dependency of": the given tasks plus
    /// every task whose dependency list reaches one of them. Composition
    /// membership is not followed, so umbrella tasks are never pulled in.
    pub fn with_dependents<I, S>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut graph = DiGraphMap::<&str, ()>::new();
        for task in self.tasks.values() {
            graph.add_node(task.name.as_str());
            for dependency in &task.dependencies {
                graph.add_edge(dependency.as_str(), task.name.as_str(), ());
            }
        }

        let mut found = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            let Some((start, _)) = self.tasks.get_key_value(name) else {
                found.insert(name.to_owned());
                continue;
            };

            let mut dfs = Dfs::new(&graph, start.as_str());
            while let Some(node) = dfs.next(&graph) {
                found.insert(node.to_owned());
            }
        }

        found
    }
}

fn extend_unique<'a>(into: &mut Vec<&'a str>, from: impl IntoIterator<Item = &'a str>) {
    for name in from {
        if !into.contains(&name) {
            into.push(name);
        }
    }
}

/// `leaves` without the ones already in `seen`.
fn fresh<'a>(seen: &[&'a str], leaves: Vec<&'a str>) -> Vec<&'a str> {
    leaves
        .into_iter()
        .filter(|leaf| !seen.contains(leaf))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::TaskContext;
    use crate::output::Output;

    fn noop(_: &TaskContext) -> anyhow::Result<Vec<Output>> {
        Ok(vec![])
    }

    fn leaf() -> Composition {
        Composition::Leaf(Arc::new(noop))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn phases(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
        plan.phases()
            .iter()
            .map(|phase| {
                let mut tasks: Vec<&str> = phase.tasks().iter().map(String::as_str).collect();
                tasks.sort();
                tasks
            })
            .collect()
    }

    /// The task table of the standard front-end pipeline, with no-op leaves.
    fn standard() -> Registry {
        let mut r = Registry::new();
        for name in [
            "clean:dev", "clean:rev", "clean:dist", "js:vendor", "js:app", "html", "images",
            "sprites", "minify:css", "minify:html", "minify:js", "minify:images", "rev",
        ] {
            r.register(name, leaf(), vec![]).unwrap();
        }
        r.register("styles:compile", leaf(), names(&["sprites"])).unwrap();
        r.register("styles", leaf(), names(&["styles:compile"])).unwrap();
        r.register("js", Composition::Parallel(names(&["js:vendor", "js:app"])), vec![]).unwrap();
        r.register("clean", Composition::Parallel(names(&["clean:rev", "clean:dist"])), vec![]).unwrap();
        r.register(
            "application",
            Composition::Parallel(names(&["js", "html", "images", "styles"])),
            vec![],
        )
        .unwrap();
        r.register(
            "minify",
            Composition::Parallel(names(&["minify:css", "minify:html", "minify:js", "minify:images"])),
            vec![],
        )
        .unwrap();
        r.register(
            "build",
            Composition::Sequence(names(&["clean", "application", "minify", "rev"])),
            vec![],
        )
        .unwrap();
        r
    }

    #[test]
    fn test_build_plan_phases() {
        let plan = standard().resolve("build").unwrap();
        assert_eq!(
            phases(&plan),
            vec![
                vec!["clean:dist", "clean:rev"],
                vec!["html", "images", "js:app", "js:vendor", "sprites"],
                vec!["styles:compile"],
                vec!["styles"],
                vec!["minify:css", "minify:html", "minify:images", "minify:js"],
                vec!["rev"],
            ]
        );
    }

    #[test]
    fn test_leaf_runs_after_its_dependencies() {
        let plan = standard().resolve("styles").unwrap();
        assert_eq!(
            phases(&plan),
            vec![vec!["sprites"], vec!["styles:compile"], vec!["styles"]]
        );
    }

    #[test]
    fn test_each_leaf_once() {
        let mut r = standard();
        r.register(
            "twice",
            Composition::Parallel(names(&["styles", "styles:compile", "sprites"])),
            vec![],
        )
        .unwrap();

        let plan = r.resolve("twice").unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.position("sprites"), Some(0));
        assert_eq!(plan.position("styles"), Some(2));
    }

    #[test]
    fn test_sequence_members_never_share_phase() {
        let mut r = Registry::new();
        r.register("a", leaf(), vec![]).unwrap();
        r.register("b", leaf(), vec![]).unwrap();
        r.register("seq", Composition::Sequence(names(&["a", "b"])), vec![]).unwrap();

        let plan = r.resolve("seq").unwrap();
        assert_eq!(plan.position("a"), Some(0));
        assert_eq!(plan.position("b"), Some(1));
    }

    #[test]
    fn test_composite_prelude() {
        let mut r = Registry::new();
        r.register("prep", leaf(), vec![]).unwrap();
        r.register("a", leaf(), vec![]).unwrap();
        r.register("b", leaf(), vec![]).unwrap();
        r.register("par", Composition::Parallel(names(&["a", "b"])), names(&["prep"]))
            .unwrap();

        let plan = r.resolve("par").unwrap();
        assert_eq!(phases(&plan), vec![vec!["prep"], vec!["a", "b"]]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut r = Registry::new();
        r.register("a", leaf(), names(&["b"])).unwrap();
        r.register("b", leaf(), names(&["c"])).unwrap();
        r.register("c", leaf(), names(&["a"])).unwrap();

        assert!(matches!(r.resolve("a"), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_cycle_through_membership() {
        let mut r = Registry::new();
        r.register("loop", Composition::Sequence(names(&["inner"])), vec![]).unwrap();
        r.register("inner", Composition::Parallel(names(&["loop"])), vec![]).unwrap();

        assert!(matches!(r.resolve("loop"), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut r = Registry::new();
        r.register("a", leaf(), names(&["a"])).unwrap();
        assert!(matches!(r.resolve("a"), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_reference() {
        let mut r = Registry::new();
        r.register("a", leaf(), names(&["missing"])).unwrap();

        assert_eq!(r.resolve("a"), Err(GraphError::Unknown("missing".into())));
        assert_eq!(r.resolve("nope"), Err(GraphError::Unknown("nope".into())));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut r = Registry::new();
        r.register("a", leaf(), vec![]).unwrap();
        assert_eq!(
            r.register("a", leaf(), vec![]),
            Err(GraphError::Duplicate("a".into()))
        );
    }

    #[test]
    fn test_with_dependents_follows_dependencies_only() {
        let r = standard();
        let affected = r.with_dependents(["sprites"]);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            ["sprites", "styles", "styles:compile"]
        );

        let affected = r.with_dependents(["js:app"]);
        assert_eq!(affected.into_iter().collect::<Vec<_>>(), ["js:app"]);
    }

    #[test]
    fn test_resolve_many() {
        let r = standard();
        let plan = r.resolve_many(["images", "sprites", "styles:compile", "styles"]).unwrap();
        assert_eq!(
            phases(&plan),
            vec![vec!["images", "sprites"], vec!["styles:compile"], vec!["styles"]]
        );
    }

    #[test]
    fn test_sequence_order_survives_shared_leaves() {
        let mut r = Registry::new();
        r.register("x", leaf(), vec![]).unwrap();
        r.register("y", leaf(), vec![]).unwrap();
        r.register("p", leaf(), names(&["x"])).unwrap();
        r.register("q", Composition::Sequence(names(&["y", "x"])), vec![]).unwrap();
        r.register("top", Composition::Parallel(names(&["p", "q"])), vec![]).unwrap();

        let plan = r.resolve("top").unwrap();
        assert!(plan.position("y") < plan.position("x"));
        assert!(plan.position("x") < plan.position("p"));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_extra_root_keeps_sequence_order() {
        let mut r = standard();
        r.register(
            "dev:compile",
            Composition::Parallel(names(&["js:vendor", "js:app", "html", "images"])),
            vec![],
        )
        .unwrap();
        r.register(
            "dev",
            Composition::Sequence(names(&["clean:dev", "dev:compile", "styles"])),
            vec![],
        )
        .unwrap();

        let plan = r.resolve_many(["dev", "js:app"]).unwrap();
        assert_eq!(plan.position("clean:dev"), Some(0));
        assert_eq!(plan.position("js:app"), Some(1));
        assert!(plan.position("sprites") > plan.position("js:app"));
        assert_eq!(plan.len(), 8);
    }

    #[test]
    fn test_contradicting_sequences() {
        let mut r = Registry::new();
        r.register("x", leaf(), vec![]).unwrap();
        r.register("y", leaf(), vec![]).unwrap();
        r.register("xy", Composition::Sequence(names(&["x", "y"])), vec![]).unwrap();
        r.register("yx", Composition::Sequence(names(&["y", "x"])), vec![]).unwrap();
        r.register("both", Composition::Parallel(names(&["xy", "yx"])), vec![]).unwrap();

        assert!(matches!(r.resolve("both"), Err(GraphError::Cycle(_))));
    }
}
