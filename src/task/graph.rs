//! Named task-graph container and dependency ordering
//!
//! Collects the nodes emitted for every component and computes a
//! topological execution order. The graph itself never executes anything;
//! an external scheduler walks the order (possibly in parallel, subject
//! to the declared edges) and consults each node's skip-if-fresh
//! predicate.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::TaskNode;

/// Errors assembling or ordering the task graph. These are input errors:
/// fatal, reported immediately.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate task name: {name}")]
    DuplicateTask { name: String },

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle involving task {name}")]
    Cycle { name: String },
}

/// Dependency graph over named task nodes.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    /// Add a node, rejecting duplicate names.
    pub fn add(&mut self, node: TaskNode) -> Result<(), GraphError> {
        if self.index.contains_key(node.name()) {
            return Err(GraphError::DuplicateTask {
                name: node.name().to_string(),
            });
        }
        self.index.insert(node.name().to_string(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn extend(
        &mut self,
        nodes: impl IntoIterator<Item = TaskNode>,
    ) -> Result<(), GraphError> {
        for node in nodes {
            self.add(node)?;
        }
        Ok(())
    }

    /// Topological execution order over declared and calc dependencies.
    ///
    /// Dynamic dependencies reported at run time (`NeedsDependencies`)
    /// always name nodes already present in the graph, so ordering over
    /// the declared edges is sufficient for a scheduler to start from.
    pub fn execution_order(&self) -> Result<Vec<&TaskNode>, GraphError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut petgraph_index: Vec<NodeIndex> = Vec::with_capacity(self.nodes.len());
        for i in 0..self.nodes.len() {
            petgraph_index.push(graph.add_node(i));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            for dep in node.task_deps().iter().chain(node.calc_deps()) {
                let dep_index =
                    self.index
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            task: node.name().to_string(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(petgraph_index[*dep_index], petgraph_index[i], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| GraphError::Cycle {
            name: self.nodes[graph[cycle.node_id()]].name().to_string(),
        })?;
        Ok(sorted.into_iter().map(|ix| &self.nodes[graph[ix]]).collect())
    }
}
