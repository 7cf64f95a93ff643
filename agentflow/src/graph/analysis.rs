//! Structural analysis of a compiled graph
//!
//! Dependency edges are `next` (minus transition jump targets) plus `runAfter`
//! read as "dependency before dependent". Those edges must form a DAG. Jump
//! edges are allowed to loop, since revisiting a state is normal.

use super::{ExecutionGraph, GraphNodeId};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Result of graph analysis operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors found while checking a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Dependency edges form a cycle
    #[error("Graph contains a dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// An edge points at a node that does not exist
    #[error("Node '{node}' references missing node '{missing}'")]
    DanglingReference {
        /// Node holding the edge
        node: String,
        /// Missing endpoint
        missing: String,
    },

    /// The root id is not a state node of the graph
    #[error("Graph root '{0}' is not a state")]
    InvalidRoot(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Analyzes execution graph structure
pub struct GraphAnalyzer<'a> {
    graph: &'a ExecutionGraph,
}

impl<'a> GraphAnalyzer<'a> {
    /// Create an analyzer for the given graph
    pub fn new(graph: &'a ExecutionGraph) -> Self {
        Self { graph }
    }

    /// Check the root and that every edge has both endpoints
    pub fn validate_references(&self) -> GraphResult<()> {
        match self.graph.nodes.get(&self.graph.root) {
            Some(root) if root.kind().is_state() => {}
            _ => return Err(GraphError::InvalidRoot(self.graph.root.to_string())),
        }

        for node in self.graph.nodes.values() {
            let edges = node
                .next
                .iter()
                .chain(node.run_after.iter())
                .chain(node.parent.iter())
                .chain(node.target.iter());
            for edge in edges {
                if !self.graph.nodes.contains_key(edge) {
                    return Err(GraphError::DanglingReference {
                        node: node.id.to_string(),
                        missing: edge.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Outgoing dependency edges of every node
    pub fn dependency_edges(&self) -> BTreeMap<&'a GraphNodeId, Vec<&'a GraphNodeId>> {
        let mut edges: BTreeMap<&GraphNodeId, Vec<&GraphNodeId>> = self
            .graph
            .nodes
            .keys()
            .map(|id| (id, Vec::new()))
            .collect();

        for node in self.graph.nodes.values() {
            for child in node.structural_next() {
                edges.entry(&node.id).or_default().push(child);
            }
            for dependency in &node.run_after {
                let dependents = edges.entry(dependency).or_default();
                if !dependents.contains(&&node.id) {
                    dependents.push(&node.id);
                }
            }
        }
        edges
    }

    /// First dependency cycle found, as the list of node ids along it
    pub fn detect_cycle(&self) -> Option<Vec<GraphNodeId>> {
        let edges = self.dependency_edges();
        let mut marks: HashMap<&GraphNodeId, Mark> = HashMap::new();

        for start in edges.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = Self::visit(*start, &edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        node: &'a GraphNodeId,
        edges: &BTreeMap<&'a GraphNodeId, Vec<&'a GraphNodeId>>,
        marks: &mut HashMap<&'a GraphNodeId, Mark>,
        path: &mut Vec<&'a GraphNodeId>,
    ) -> Option<Vec<GraphNodeId>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);

        for next in edges.get(node).into_iter().flatten() {
            match marks.get(next) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|id| id == next).unwrap_or(0);
                    let mut cycle: Vec<GraphNodeId> =
                        path[start..].iter().map(|id| (*id).clone()).collect();
                    cycle.push((*next).clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = Self::visit(*next, edges, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    /// States reachable from the root through initial entry and transition targets
    pub fn find_reachable_states(&self) -> HashSet<GraphNodeId> {
        let mut reachable = HashSet::new();
        let mut to_visit = VecDeque::from([self.graph.root.clone()]);

        while let Some(state_id) = to_visit.pop_front() {
            if !reachable.insert(state_id.clone()) {
                continue;
            }
            for child in self.graph.child_states(&state_id) {
                if child.run_after.contains(&state_id) {
                    to_visit.push_back(child.id.clone());
                }
            }
            for transition in self.graph.transitions_of(&state_id) {
                if let Some(target) = &transition.target {
                    to_visit.push_back(target.clone());
                    // entering a nested target also enters its ancestors
                    for ancestor in self.graph.state_ancestors(target) {
                        to_visit.push_back(ancestor.id.clone());
                    }
                }
            }
        }

        reachable
    }

    /// States that can never be entered, in document order
    pub fn find_unreachable_states(&self) -> Vec<GraphNodeId> {
        let reachable = self.find_reachable_states();
        let mut unreachable: Vec<_> = self
            .graph
            .states()
            .filter(|state| !reachable.contains(&state.id))
            .collect();
        unreachable.sort_by_key(|state| state.order);
        unreachable.into_iter().map(|state| state.id.clone()).collect()
    }

    /// Transition adjacency between states: source state to target states
    pub fn build_adjacency_list(&self) -> BTreeMap<GraphNodeId, Vec<GraphNodeId>> {
        let mut adjacency = BTreeMap::new();
        for state in self.graph.states() {
            let targets = self
                .graph
                .transitions_of(&state.id)
                .filter_map(|t| t.target.clone())
                .collect();
            adjacency.insert(state.id.clone(), targets);
        }
        adjacency
    }
}
