//! Execution graph node types

use crate::element::{ElementKind, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a graph node
///
/// Derived from the source element key, so recompiling the same tree yields
/// the same ids. Branch partitions use `<if key>#<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphNodeId(String);

impl GraphNodeId {
    /// Wrap a raw id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the `n`th partition of an `if` node
    pub fn partition(if_id: &GraphNodeId, n: usize) -> Self {
        Self(format!("{}#{}", if_id.0, n))
    }

    /// Raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fine-grained node kind the runtime dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Root state
    Workflow,
    /// Compound or atomic state
    State,
    /// Parallel state
    Parallel,
    /// Final state
    Final,
    /// Declaration container
    DataModel,
    /// Variable declaration
    Data,
    /// Assignment
    Assign,
    /// Conditional block holding partitions
    If,
    /// One guarded branch of an `if`
    IfPart,
    /// Guarded edge
    Transition,
    /// Entry content
    OnEntry,
    /// Exit content
    OnExit,
    /// Expression
    Script,
    /// Log output
    Log,
    /// Internal event
    Raise,
    /// Model call
    Llm,
    /// Human input
    UserInput,
    /// Explicit failure
    Error,
}

impl NodeKind {
    /// Node kind for a source element; `None` for elements that only exist as
    /// branch markers or have no graph construction
    pub fn from_element(kind: &ElementKind) -> Option<Self> {
        Some(match kind {
            ElementKind::Workflow => Self::Workflow,
            ElementKind::State => Self::State,
            ElementKind::Parallel => Self::Parallel,
            ElementKind::Final => Self::Final,
            ElementKind::DataModel => Self::DataModel,
            ElementKind::Data => Self::Data,
            ElementKind::Assign => Self::Assign,
            ElementKind::If => Self::If,
            ElementKind::Transition => Self::Transition,
            ElementKind::OnEntry => Self::OnEntry,
            ElementKind::OnExit => Self::OnExit,
            ElementKind::Script => Self::Script,
            ElementKind::Log => Self::Log,
            ElementKind::Raise => Self::Raise,
            ElementKind::Llm => Self::Llm,
            ElementKind::UserInput => Self::UserInput,
            ElementKind::Error => Self::Error,
            ElementKind::ElseIf | ElementKind::Else | ElementKind::Unknown(_) => return None,
        })
    }

    /// True for nodes that can be entered
    pub fn is_state(self) -> bool {
        matches!(
            self,
            Self::Workflow | Self::State | Self::Parallel | Self::Final
        )
    }

    /// Coarse role
    pub fn role(self) -> Role {
        match self {
            Self::Workflow | Self::State | Self::Parallel | Self::Final => Role::State,
            Self::Llm => Role::Output,
            Self::Error => Role::Error,
            Self::UserInput => Role::UserInput,
            _ => Role::Action,
        }
    }

    /// Display name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::State => "state",
            Self::Parallel => "parallel",
            Self::Final => "final",
            Self::DataModel => "datamodel",
            Self::Data => "data",
            Self::Assign => "assign",
            Self::If => "if",
            Self::IfPart => "if-part",
            Self::Transition => "transition",
            Self::OnEntry => "onentry",
            Self::OnExit => "onexit",
            Self::Script => "script",
            Self::Log => "log",
            Self::Raise => "raise",
            Self::Llm => "llm",
            Self::UserInput => "user-input",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the compiled graph
///
/// `next` holds the node's own sub-actions and sub-states in document order.
/// For transitions it ends with the resolved target, which is also recorded in
/// `target` so the runtime and the cycle check can tell the jump edge apart
/// from inline actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraphElement {
    /// Node identity
    pub id: GraphNodeId,
    /// User-declared id of the source element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Source element key
    pub key: String,
    /// Coarse kind
    #[serde(rename = "type")]
    pub node_type: Role,
    /// Fine kind
    #[serde(rename = "subType")]
    pub sub_type: NodeKind,
    /// Attributes copied or derived from the source element
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Text content of the source element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Guard; absent means unconditional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Ordered child nodes
    #[serde(default)]
    pub next: Vec<GraphNodeId>,
    /// Nodes that must settle before this one may start
    #[serde(default, rename = "runAfter")]
    pub run_after: Vec<GraphNodeId>,
    /// Structural parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<GraphNodeId>,
    /// Resolved transition target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<GraphNodeId>,
    /// Document pre-order position of the source element
    pub order: usize,
}

impl ExecutionGraphElement {
    /// Fresh node without edges
    pub fn new(id: GraphNodeId, key: impl Into<String>, kind: NodeKind, order: usize) -> Self {
        Self {
            id,
            element_id: None,
            key: key.into(),
            node_type: kind.role(),
            sub_type: kind,
            attributes: BTreeMap::new(),
            text: None,
            when: None,
            next: Vec::new(),
            run_after: Vec::new(),
            parent: None,
            target: None,
            order,
        }
    }

    /// Fine kind
    pub fn kind(&self) -> NodeKind {
        self.sub_type
    }

    /// Attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// User id when present, graph id otherwise
    pub fn label(&self) -> &str {
        self.element_id.as_deref().unwrap_or(self.id.as_str())
    }

    /// Children excluding a transition's jump target
    pub fn structural_next(&self) -> impl Iterator<Item = &GraphNodeId> {
        self.next
            .iter()
            .filter(move |id| self.target.as_ref() != Some(*id))
    }

    /// Add a `run_after` dependency once
    pub fn add_run_after(&mut self, dependency: GraphNodeId) {
        if !self.run_after.contains(&dependency) {
            self.run_after.push(dependency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_ids() {
        let id = GraphNodeId::new("0.1.2");
        assert_eq!(GraphNodeId::partition(&id, 0).as_str(), "0.1.2#0");
    }

    #[test]
    fn test_structural_next_skips_target() {
        let mut node = ExecutionGraphElement::new(
            GraphNodeId::new("t"),
            "t",
            NodeKind::Transition,
            3,
        );
        node.next = vec![GraphNodeId::new("a"), GraphNodeId::new("s2")];
        node.target = Some(GraphNodeId::new("s2"));
        let inline: Vec<_> = node.structural_next().map(GraphNodeId::as_str).collect();
        assert_eq!(inline, vec!["a"]);
    }

    #[test]
    fn test_serialized_field_names() {
        let node = ExecutionGraphElement::new(GraphNodeId::new("0"), "0", NodeKind::Workflow, 0);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["subType"], "workflow");
        assert!(json["runAfter"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_branch_markers_have_no_node_kind() {
        assert_eq!(NodeKind::from_element(&ElementKind::Else), None);
        assert_eq!(
            NodeKind::from_element(&ElementKind::Unknown("blink".into())),
            None
        );
        assert_eq!(
            NodeKind::from_element(&ElementKind::Final),
            Some(NodeKind::Final)
        );
    }
}
