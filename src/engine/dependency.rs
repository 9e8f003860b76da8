// ABOUTME: Dependency graph between workflow steps derived from thunk dependencies
// ABOUTME: Handles cycle detection, Kahn topological ordering, and incremental ready sets

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::error::{ExecutionError, Result};
use super::step::{StepId, WorkflowStep};

/// Step-level dependency graph.
///
/// Node indices follow registration order, which doubles as the tie-break
/// among simultaneously ready steps.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<StepId, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
    in_degree: HashMap<NodeIndex, usize>,
    completed: HashSet<NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of steps.
    ///
    /// An edge `u -> v` is added when a thunk of `v` depends on a thunk owned
    /// by `u`. Dependencies on thunks outside the request add no edge.
    pub fn from_steps(steps: &[WorkflowStep]) -> Result<Self> {
        let mut graph = Self::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for step in steps {
            graph.add_step(&step.id);
            for thunk in &step.thunks {
                if let Some(previous) = owners.insert(thunk.id.as_str(), step.id.as_str()) {
                    return Err(ExecutionError::InvalidRequest {
                        message: format!(
                            "Thunk '{}' is declared by both '{}' and '{}'",
                            thunk.id, previous, step.id
                        ),
                    });
                }
            }
        }

        for step in steps {
            for dependency in step.dependency_ids() {
                match owners.get(dependency.as_str()) {
                    Some(&owner) if owner != step.id => {
                        graph.add_dependency(owner, &step.id)?;
                    }
                    Some(_) => {}
                    None => {
                        tracing::debug!(
                            "Step {} depends on external thunk {}",
                            step.id,
                            dependency
                        );
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Register a step node. Registering the same id twice is a no-op.
    pub fn add_step(&mut self, step_id: &str) {
        if self.step_indices.contains_key(step_id) {
            return;
        }
        let node = self.graph.add_node(step_id.to_string());
        self.step_indices.insert(step_id.to_string(), node);
        self.in_degree.insert(node, 0);
    }

    /// Add `from -> to` and bump the in-degree of `to`.
    pub fn add_dependency(&mut self, from_step: &str, to_step: &str) -> Result<()> {
        let from = self.index_of(from_step)?;
        let to = self.index_of(to_step)?;

        if self.graph.contains_edge(from, to) {
            return Ok(());
        }

        self.graph.add_edge(from, to, ());
        *self.in_degree.entry(to).or_insert(0) += 1;
        Ok(())
    }

    pub fn has_cycles(&self) -> bool {
        self.kahn().1.is_some()
    }

    /// Steps in dependency order; ready ties resolve to registration order.
    pub fn topological_order(&self) -> Result<Vec<StepId>> {
        match self.kahn() {
            (order, None) => Ok(order),
            (_, Some(stuck)) => Err(ExecutionError::CircularDependency { steps: stuck }),
        }
    }

    /// Steps that could not be ordered because they sit on or behind a cycle.
    pub fn find_cycle(&self) -> Option<Vec<StepId>> {
        self.kahn().1
    }

    /// Steps whose in-degree reached zero and that are not yet completed.
    pub fn ready_steps(&self) -> Vec<StepId> {
        self.graph
            .node_indices()
            .filter(|node| !self.completed.contains(node))
            .filter(|node| self.in_degree.get(node).copied().unwrap_or(0) == 0)
            .map(|node| self.graph[node].clone())
            .collect()
    }

    /// Record a step as completed and release its direct dependents.
    pub fn mark_completed(&mut self, step_id: &str) -> Result<()> {
        let node = self.index_of(step_id)?;
        if !self.completed.insert(node) {
            return Ok(());
        }

        let dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        for dependent in dependents {
            if let Some(degree) = self.in_degree.get_mut(&dependent) {
                *degree = degree.saturating_sub(1);
            }
        }
        Ok(())
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.step_indices
            .get(step_id)
            .is_some_and(|node| self.completed.contains(node))
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.step_indices.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.step_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_indices.is_empty()
    }

    /// Steps that directly depend on the given step
    pub fn dependents(&self, step_id: &str) -> Vec<StepId> {
        self.neighbors(step_id, Direction::Outgoing)
    }

    /// Steps the given step directly depends on
    pub fn dependencies(&self, step_id: &str) -> Vec<StepId> {
        self.neighbors(step_id, Direction::Incoming)
    }

    fn neighbors(&self, step_id: &str, direction: Direction) -> Vec<StepId> {
        let Some(&node) = self.step_indices.get(step_id) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        nodes.sort();
        nodes.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    fn index_of(&self, step_id: &str) -> Result<NodeIndex> {
        self.step_indices
            .get(step_id)
            .copied()
            .ok_or_else(|| ExecutionError::StepNotFound {
                step_id: step_id.to_string(),
            })
    }

    /// Kahn's algorithm over the structural in-degrees.
    ///
    /// Returns the consumed order and, when nodes remain, the leftovers.
    fn kahn(&self) -> (Vec<StepId>, Option<Vec<StepId>>) {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|node| {
                let degree = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count();
                (node, degree)
            })
            .collect();

        let mut queue: BinaryHeap<Reverse<NodeIndex>> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = queue.pop() {
            order.push(self.graph[node].clone());
            remaining.remove(&node);

            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = remaining.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(Reverse(dependent));
                    }
                }
            }
        }

        if remaining.is_empty() {
            (order, None)
        } else {
            let mut stuck: Vec<NodeIndex> = remaining.into_keys().collect();
            stuck.sort();
            let stuck = stuck.into_iter().map(|n| self.graph[n].clone()).collect();
            (order, Some(stuck))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::thunk::{Thunk, ThunkKind};

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut thunk = Thunk::new(ThunkKind::Compute, "calculator").with_id(format!("{}_t", id));
        for dep in deps {
            thunk = thunk.with_dependency(format!("{}_t", dep));
        }
        WorkflowStep::new(id, id).with_thunk(thunk)
    }

    fn diamond() -> Vec<WorkflowStep> {
        vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]
    }

    #[test]
    fn test_graph_from_thunk_dependencies() {
        let graph = DependencyGraph::from_steps(&diamond()).unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.dependencies("a"), Vec::<String>::new());
        assert_eq!(graph.dependencies("b"), vec!["a"]);
        assert_eq!(graph.dependencies("d"), vec!["b", "c"]);
        assert_eq!(graph.dependents("a"), vec!["b", "c"]);
        assert!(!graph.has_cycles());
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let graph = DependencyGraph::from_steps(&diamond()).unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ready_set_advances_with_completion() {
        let mut graph = DependencyGraph::from_steps(&diamond()).unwrap();
        assert_eq!(graph.ready_steps(), vec!["a"]);

        graph.mark_completed("a").unwrap();
        assert_eq!(graph.ready_steps(), vec!["b", "c"]);

        graph.mark_completed("b").unwrap();
        assert_eq!(graph.ready_steps(), vec!["c"]);

        graph.mark_completed("c").unwrap();
        assert_eq!(graph.ready_steps(), vec!["d"]);
        assert!(graph.is_completed("c"));
    }

    #[test]
    fn test_marking_twice_does_not_double_release() {
        let mut graph = DependencyGraph::from_steps(&diamond()).unwrap();
        graph.mark_completed("a").unwrap();
        graph.mark_completed("b").unwrap();
        graph.mark_completed("b").unwrap();

        assert!(!graph.ready_steps().contains(&"d".to_string()));
    }

    #[test]
    fn test_cycle_detection() {
        let steps = vec![step("a", &["b"]), step("b", &["a"]), step("c", &[])];
        let graph = DependencyGraph::from_steps(&steps).unwrap();

        assert!(graph.has_cycles());
        assert_eq!(graph.find_cycle(), Some(vec!["a".to_string(), "b".to_string()]));
        assert!(matches!(
            graph.topological_order(),
            Err(ExecutionError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_external_and_self_dependencies_add_no_edges() {
        let a = WorkflowStep::new("a", "a")
            .with_thunk(Thunk::new(ThunkKind::Compute, "x").with_id("a1"))
            .with_thunk(
                Thunk::new(ThunkKind::Compute, "x")
                    .with_id("a2")
                    .with_dependency("a1")
                    .with_dependency("outside"),
            );
        let graph = DependencyGraph::from_steps(&[a]).unwrap();

        assert!(!graph.has_cycles());
        assert_eq!(graph.ready_steps(), vec!["a"]);
    }

    #[test]
    fn test_duplicate_thunk_ids_are_rejected() {
        let steps = vec![
            WorkflowStep::new("a", "a").with_thunk(Thunk::new(ThunkKind::Compute, "x").with_id("t")),
            WorkflowStep::new("b", "b").with_thunk(Thunk::new(ThunkKind::Compute, "x").with_id("t")),
        ];
        assert!(DependencyGraph::from_steps(&steps).is_err());
    }

    #[test]
    fn test_unknown_endpoint() {
        let mut graph = DependencyGraph::new();
        graph.add_step("a");
        assert!(matches!(
            graph.add_dependency("a", "missing"),
            Err(ExecutionError::StepNotFound { .. })
        ));
    }
}
