//! Execution graph and the compiler that produces it
//!
//! [`compile`] validates an element tree, lowers it node by node through the
//! [`GraphBuilder`], then checks that dependency edges are acyclic. The result
//! is plain data: every edge is a [`GraphNodeId`], so the graph serializes as is.

pub mod analysis;
pub mod builder;
pub mod condition;
pub mod node;
pub mod transition;
pub mod visualization;

pub use analysis::{GraphAnalyzer, GraphError, GraphResult};
pub use builder::{BuildContext, GraphBuilder};
pub use node::{ExecutionGraphElement, GraphNodeId, NodeKind};

use crate::element::{schema, ElementTree};
use crate::error::{CompileError, CompileErrors};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compiled workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// Root state
    pub root: GraphNodeId,
    /// Every node by id
    pub nodes: BTreeMap<GraphNodeId, ExecutionGraphElement>,
}

/// Compile an element tree into an execution graph
///
/// Deterministic and side-effect free apart from logging. All structural and
/// construction problems are reported together.
pub fn compile(tree: &ElementTree) -> Result<ExecutionGraph, CompileErrors> {
    let mut errors = CompileErrors(schema::validate(tree));

    let (root, nodes, build_errors) = GraphBuilder::new(tree).build();
    errors.0.extend(build_errors);

    let root = match root {
        Some(root) if errors.is_empty() => root,
        _ => {
            tracing::debug!("Compilation produced {} error(s)", errors.len());
            return Err(errors);
        }
    };

    let graph = ExecutionGraph { root, nodes };
    graph.validate().map_err(CompileError::from)?;

    for state in GraphAnalyzer::new(&graph).find_unreachable_states() {
        tracing::warn!("State '{}' can never be entered", graph.label(&state));
    }
    tracing::debug!("Compiled execution graph with {} nodes", graph.nodes.len());
    Ok(graph)
}

impl ExecutionGraph {
    /// Assemble a graph from nodes
    pub fn from_nodes(
        root: GraphNodeId,
        nodes: impl IntoIterator<Item = ExecutionGraphElement>,
    ) -> Self {
        Self {
            root,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    /// Check references and the dependency DAG
    pub fn validate(&self) -> Result<(), GraphError> {
        let analyzer = GraphAnalyzer::new(self);
        analyzer.validate_references()?;
        match analyzer.detect_cycle() {
            Some(cycle) => Err(GraphError::Cycle(
                cycle.iter().map(|id| id.to_string()).collect(),
            )),
            None => Ok(()),
        }
    }

    /// Node by id
    pub fn get(&self, id: &GraphNodeId) -> Option<&ExecutionGraphElement> {
        self.nodes.get(id)
    }

    /// User id of a node when it has one, graph id otherwise
    pub fn label<'a>(&'a self, id: &'a GraphNodeId) -> &'a str {
        self.get(id).map(|n| n.label()).unwrap_or(id.as_str())
    }

    /// All state nodes
    pub fn states(&self) -> impl Iterator<Item = &ExecutionGraphElement> {
        self.nodes.values().filter(|n| n.kind().is_state())
    }

    /// Resolve a state by graph id or user id
    pub fn find_state(&self, reference: &str) -> Option<&ExecutionGraphElement> {
        if let Some(node) = self.get(&GraphNodeId::new(reference)) {
            if node.kind().is_state() {
                return Some(node);
            }
        }
        self.states()
            .filter(|n| n.element_id.as_deref() == Some(reference))
            .min_by_key(|n| n.order)
    }

    fn children_of(&self, id: &GraphNodeId) -> impl Iterator<Item = &ExecutionGraphElement> {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.structural_next())
            .filter_map(|child| self.nodes.get(child))
    }

    /// Child states in document order
    pub fn child_states(&self, id: &GraphNodeId) -> impl Iterator<Item = &ExecutionGraphElement> {
        self.children_of(id).filter(|n| n.kind().is_state())
    }

    /// Transitions declared directly on a state, in document order
    pub fn transitions_of(
        &self,
        id: &GraphNodeId,
    ) -> impl Iterator<Item = &ExecutionGraphElement> {
        self.children_of(id)
            .filter(|n| n.kind() == NodeKind::Transition)
    }

    /// Content run when a state is entered, in document order
    pub fn entry_content(&self, id: &GraphNodeId) -> Vec<GraphNodeId> {
        self.children_of(id)
            .filter(|n| {
                !n.kind().is_state()
                    && !matches!(
                        n.kind(),
                        NodeKind::Transition | NodeKind::OnExit | NodeKind::DataModel
                    )
            })
            .map(|n| n.id.clone())
            .collect()
    }

    /// `onexit` containers of a state, in document order
    pub fn exit_content(&self, id: &GraphNodeId) -> Vec<GraphNodeId> {
        self.children_of(id)
            .filter(|n| n.kind() == NodeKind::OnExit)
            .map(|n| n.id.clone())
            .collect()
    }

    /// `data` declarations owned by a state
    pub fn data_declarations(&self, id: &GraphNodeId) -> Vec<&ExecutionGraphElement> {
        self.children_of(id)
            .filter(|n| n.kind() == NodeKind::DataModel)
            .flat_map(|model| self.children_of(&model.id))
            .filter(|n| n.kind() == NodeKind::Data)
            .collect()
    }

    /// Proper state ancestors, nearest first
    pub fn state_ancestors(&self, id: &GraphNodeId) -> Vec<&ExecutionGraphElement> {
        let mut ancestors = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent.as_ref());
        while let Some(parent_id) = current {
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            if parent.kind().is_state() {
                ancestors.push(parent);
            }
            current = parent.parent.as_ref();
        }
        ancestors
    }

    /// The state a node belongs to: itself for states, the nearest state
    /// ancestor otherwise
    pub fn owning_state(&self, id: &GraphNodeId) -> Option<&ExecutionGraphElement> {
        match self.get(id) {
            Some(node) if node.kind().is_state() => Some(node),
            Some(_) => self.state_ancestors(id).into_iter().next(),
            None => None,
        }
    }

    /// True when `node` is a proper descendant of `ancestor`
    pub fn is_descendant(&self, node: &GraphNodeId, ancestor: &GraphNodeId) -> bool {
        self.state_ancestors(node)
            .iter()
            .any(|candidate| &candidate.id == ancestor)
    }

    /// Number of state ancestors
    pub fn depth(&self, id: &GraphNodeId) -> usize {
        self.state_ancestors(id).len()
    }
}
