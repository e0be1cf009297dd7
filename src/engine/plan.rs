use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::engine::{ActionFn, Step, Task, TaskGraph};
use crate::error::RunError;

/// A single action scheduled by a plan.
pub(crate) struct Node {
    pub name: String,
    pub action: Arc<ActionFn>,
}

/// An edge `a -> b` means `a` must complete before `b` starts.
pub(crate) struct Plan {
    pub graph: Graph<Node, ()>,
}

/// Entry and exit actions of an expanded composition.
#[derive(Default)]
struct Fragment {
    sources: Vec<NodeIndex>,
    sinks: Vec<NodeIndex>,
}

impl Fragment {
    fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Plan {
    /// Flattens the named task into a graph of actions.
    pub fn build(registry: &TaskGraph, name: &str) -> Result<Self, RunError> {
        let mut plan = Plan {
            graph: Graph::new(),
        };
        let mut stack = Vec::new();

        plan.expand_named(registry, name, &mut stack)?;

        Ok(plan)
    }

    fn expand_named(
        &mut self,
        registry: &TaskGraph,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<Fragment, RunError> {
        if stack.iter().any(|n| n == name) {
            return Err(RunError::Cycle(name.to_string()));
        }

        let task = registry
            .get(name)
            .ok_or_else(|| RunError::UnknownTask(name.to_string()))?;

        stack.push(name.to_string());
        let fragment = self.expand(registry, task, name, stack)?;
        stack.pop();

        Ok(fragment)
    }

    fn expand(
        &mut self,
        registry: &TaskGraph,
        task: &Task,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<Fragment, RunError> {
        match task {
            Task::Action(action) => {
                let index = self.graph.add_node(Node {
                    name: name.to_string(),
                    action: action.clone(),
                });

                Ok(Fragment {
                    sources: vec![index],
                    sinks: vec![index],
                })
            }
            Task::Series(steps) => {
                let mut acc = Fragment::default();

                for (i, step) in steps.iter().enumerate() {
                    let next = self.expand_step(registry, step, name, i, stack)?;
                    if next.is_empty() {
                        continue;
                    }

                    if acc.is_empty() {
                        acc = next;
                        continue;
                    }

                    for &sink in &acc.sinks {
                        for &source in &next.sources {
                            self.graph.add_edge(sink, source, ());
                        }
                    }
                    acc.sinks = next.sinks;
                }

                Ok(acc)
            }
            Task::Parallel(steps) => {
                let mut acc = Fragment::default();

                for (i, step) in steps.iter().enumerate() {
                    let next = self.expand_step(registry, step, name, i, stack)?;
                    acc.sources.extend(next.sources);
                    acc.sinks.extend(next.sinks);
                }

                Ok(acc)
            }
        }
    }

    fn expand_step(
        &mut self,
        registry: &TaskGraph,
        step: &Step,
        parent: &str,
        position: usize,
        stack: &mut Vec<String>,
    ) -> Result<Fragment, RunError> {
        match step {
            Step::Named(name) => self.expand_named(registry, name, stack),
            Step::Inline(task) => {
                let name = format!("{parent}#{position}");
                self.expand(registry, task, &name, stack)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{action, parallel, series};

    fn noop() -> Task {
        action(|_| Ok(()))
    }

    fn names(plan: &Plan) -> Vec<&str> {
        let mut names: Vec<_> = plan
            .graph
            .node_indices()
            .map(|i| plan.graph[i].name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn edges(plan: &Plan) -> Vec<(String, String)> {
        let mut edges: Vec<_> = plan
            .graph
            .raw_edges()
            .iter()
            .map(|e| {
                (
                    plan.graph[e.source()].name.clone(),
                    plan.graph[e.target()].name.clone(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    #[test]
    fn default_build_shape() {
        let mut graph = TaskGraph::with_threads(1).unwrap();
        for name in ["js-es6", "css-themes", "css-core", "plugins"] {
            graph.register(name, noop()).unwrap();
        }
        graph.register("js", parallel(["js-es6"])).unwrap();
        graph.register("css", parallel(["css-themes", "css-core"])).unwrap();
        graph
            .register("default", series([parallel(["js", "css", "plugins"])]))
            .unwrap();

        let plan = Plan::build(&graph, "default").unwrap();

        assert_eq!(names(&plan), ["css-core", "css-themes", "js-es6", "plugins"]);
        assert!(edges(&plan).is_empty());
    }

    #[test]
    fn series_connects_every_sink_to_every_source() {
        let mut graph = TaskGraph::with_threads(1).unwrap();
        for name in ["a", "b", "c", "d"] {
            graph.register(name, noop()).unwrap();
        }
        graph
            .register(
                "all",
                series([parallel(["a", "b"]), parallel(["c", "d"])]),
            )
            .unwrap();

        let plan = Plan::build(&graph, "all").unwrap();

        let expected: Vec<(String, String)> = [("a", "c"), ("a", "d"), ("b", "c"), ("b", "d")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(edges(&plan), expected);
    }

    #[test]
    fn inline_steps_are_named_after_parent() {
        let mut graph = TaskGraph::with_threads(1).unwrap();
        graph.register("default", noop()).unwrap();
        graph
            .register("package", series([Step::from("default"), noop().into()]))
            .unwrap();

        let plan = Plan::build(&graph, "package").unwrap();

        assert_eq!(names(&plan), ["default", "package#1"]);
        assert_eq!(
            edges(&plan),
            [("default".to_string(), "package#1".to_string())]
        );
    }

    #[test]
    fn empty_compositions_are_skipped_in_series() {
        let mut graph = TaskGraph::with_threads(1).unwrap();
        graph.register("a", noop()).unwrap();
        graph.register("b", noop()).unwrap();
        graph
            .register(
                "all",
                series([Step::from("a"), parallel(Vec::<Step>::new()).into(), "b".into()]),
            )
            .unwrap();

        let plan = Plan::build(&graph, "all").unwrap();

        assert_eq!(edges(&plan), [("a".to_string(), "b".to_string())]);
    }

    #[test]
    fn shared_reference_is_not_a_cycle() {
        let mut graph = TaskGraph::with_threads(1).unwrap();
        graph.register("js", noop()).unwrap();
        graph.register("twice", series(["js", "js"])).unwrap();

        let plan = Plan::build(&graph, "twice").unwrap();
        assert_eq!(plan.graph.node_count(), 2);
    }
}
