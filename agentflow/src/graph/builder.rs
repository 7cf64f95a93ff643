//! Lowering of an element tree into an execution graph
//!
//! Each element kind has one construction routine, dispatched by `match`.
//! States and transitions are registered in the cache before their children
//! are compiled, so a transition that leads back to a state still being built
//! gets the existing node id instead of recursing forever.

use super::condition::{compose_branch_guards, Branch};
use super::node::{ExecutionGraphElement, GraphNodeId, NodeKind};
use super::transition::merge_guard;
use crate::element::{ElementIndex, ElementKind, ElementTree};
use crate::error::{CompileError, ElementError, TargetFailure, TransitionTargetError};
use std::collections::{BTreeMap, HashMap};

/// Attributes that `llm` nodes inherit from their nearest ancestor declaring them
const INHERITED_LLM_ATTRIBUTES: &[&str] = &["model", "temperature", "system"];

type CacheKey = (String, Option<String>);

/// Build-time context for one element
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    ancestors: Vec<ElementIndex>,
}

impl BuildContext {
    /// Context for the root element
    pub fn root() -> Self {
        Self::default()
    }

    /// Context rebuilt from the tree for any element, used when a transition
    /// target is compiled away from its own position
    pub fn rooted_at(tree: &ElementTree, index: ElementIndex) -> Self {
        let mut ancestors: Vec<ElementIndex> = tree.ancestors(index).collect();
        ancestors.reverse();
        Self { ancestors }
    }

    /// Context for a child of `parent`
    pub fn for_child(&self, parent: ElementIndex) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(parent);
        Self { ancestors }
    }

    /// Nearest ancestor value of an attribute
    pub fn ancestor_attribute<'t>(&self, tree: &'t ElementTree, name: &str) -> Option<&'t str> {
        self.ancestors
            .iter()
            .rev()
            .find_map(|ancestor| tree.get(*ancestor).attr(name))
    }
}

/// Compiles one element tree
pub struct GraphBuilder<'t> {
    tree: &'t ElementTree,
    nodes: BTreeMap<GraphNodeId, ExecutionGraphElement>,
    cache: HashMap<CacheKey, GraphNodeId>,
    errors: Vec<CompileError>,
}

impl<'t> GraphBuilder<'t> {
    /// Builder over `tree`
    pub fn new(tree: &'t ElementTree) -> Self {
        Self {
            tree,
            nodes: BTreeMap::new(),
            cache: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Compile the whole tree, returning the root id, the nodes and every
    /// diagnostic found on the way
    pub fn build(
        mut self,
    ) -> (
        Option<GraphNodeId>,
        BTreeMap<GraphNodeId, ExecutionGraphElement>,
        Vec<CompileError>,
    ) {
        let root = self.tree.root();
        let root_id = self.compile(root, &BuildContext::root());
        (root_id, self.nodes, self.errors)
    }

    /// Search the entire tree for an element whose user id equals `reference`
    ///
    /// States win over other elements sharing the id, so a variable named like
    /// a state does not shadow it as a target.
    pub fn find_element_by_key(&self, reference: &str) -> Option<ElementIndex> {
        self.tree
            .find_state_by_id(reference)
            .or_else(|| self.tree.find_by_id(reference))
    }

    /// Compile one element, returning its node id or `None` after recording an error
    pub fn compile(&mut self, index: ElementIndex, ctx: &BuildContext) -> Option<GraphNodeId> {
        let tree = self.tree;
        let element = tree.get(index);
        match &element.kind {
            ElementKind::Workflow
            | ElementKind::State
            | ElementKind::Parallel
            | ElementKind::Final => self.compile_state(index, ctx),
            ElementKind::Transition => self.compile_transition(index, ctx),
            ElementKind::If => self.compile_if(index, ctx),
            ElementKind::OnEntry | ElementKind::OnExit | ElementKind::DataModel => {
                self.compile_container(index, ctx)
            }
            ElementKind::Data
            | ElementKind::Assign
            | ElementKind::Script
            | ElementKind::Log
            | ElementKind::Raise
            | ElementKind::Llm
            | ElementKind::UserInput
            | ElementKind::Error => self.compile_leaf(index, ctx),
            ElementKind::ElseIf | ElementKind::Else => {
                self.fail(index, "branch markers are only compiled as part of <if>");
                None
            }
            ElementKind::Unknown(_) => {
                self.fail(index, "element type has no graph construction");
                None
            }
        }
    }

    fn fail(&mut self, index: ElementIndex, message: &str) {
        let element = self.tree.get(index);
        self.errors.push(
            ElementError::new(
                element.kind.tag(),
                element.id.clone(),
                &element.key,
                message,
            )
            .into(),
        );
    }

    fn cache_key(&self, index: ElementIndex) -> CacheKey {
        let element = self.tree.get(index);
        (element.key.clone(), element.id.clone())
    }

    /// Create a node mirroring the element's identity and attributes
    fn new_node(&self, index: ElementIndex, kind: NodeKind) -> ExecutionGraphElement {
        let element = self.tree.get(index);
        let mut node = ExecutionGraphElement::new(
            GraphNodeId::new(&element.key),
            &element.key,
            kind,
            index.position(),
        );
        node.element_id = element.id.clone();
        node.attributes = element.attributes.clone();
        node.text = element.text.clone();
        node
    }

    fn insert(&mut self, node: ExecutionGraphElement) -> GraphNodeId {
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        id
    }

    fn adopt(&mut self, child: &GraphNodeId, parent: &GraphNodeId) {
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent.clone());
        }
    }

    fn compile_leaf(&mut self, index: ElementIndex, ctx: &BuildContext) -> Option<GraphNodeId> {
        let element = self.tree.get(index);
        let kind = NodeKind::from_element(&element.kind)?;
        let mut node = self.new_node(index, kind);

        if kind == NodeKind::Llm {
            for name in INHERITED_LLM_ATTRIBUTES {
                if !node.attributes.contains_key(*name) {
                    if let Some(value) = ctx.ancestor_attribute(self.tree, name) {
                        node.attributes.insert(name.to_string(), value.to_string());
                    }
                }
            }
        }

        Some(self.insert(node))
    }

    /// `onentry`, `onexit` and `datamodel`: children compiled in document order
    fn compile_container(&mut self, index: ElementIndex, ctx: &BuildContext) -> Option<GraphNodeId> {
        let tree = self.tree;
        let kind = NodeKind::from_element(&tree.get(index).kind)?;
        let id = self.insert(self.new_node(index, kind));
        let child_ctx = ctx.for_child(index);

        let mut next = Vec::new();
        for child in tree.get(index).children.iter().copied() {
            if let Some(child_id) = self.compile(child, &child_ctx) {
                self.adopt(&child_id, &id);
                next.push(child_id);
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.next = next;
        }
        Some(id)
    }

    fn compile_state(&mut self, index: ElementIndex, ctx: &BuildContext) -> Option<GraphNodeId> {
        let cache_key = self.cache_key(index);
        if let Some(existing) = self.cache.get(&cache_key) {
            return Some(existing.clone());
        }

        let tree = self.tree;
        let element = tree.get(index);
        let kind = NodeKind::from_element(&element.kind)?;
        let id = self.insert(self.new_node(index, kind));
        self.cache.insert(cache_key, id.clone());

        let initial = self.initial_children(index);
        let child_ctx = ctx.for_child(index);
        let mut next = Vec::new();

        for child in element.children.iter().copied() {
            let Some(child_id) = self.compile(child, &child_ctx) else {
                continue;
            };
            self.adopt(&child_id, &id);

            let child_kind = &tree.get(child).kind;
            if *child_kind == ElementKind::Transition
                || (child_kind.is_state_like() && initial.contains(&child))
            {
                if let Some(node) = self.nodes.get_mut(&child_id) {
                    node.add_run_after(id.clone());
                }
            }
            next.push(child_id);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.next = next;
        }
        Some(id)
    }

    /// Child states entered together with `index`: every region of a parallel
    /// state, otherwise the child named by `initial` or the first child state
    fn initial_children(&self, index: ElementIndex) -> Vec<ElementIndex> {
        let element = self.tree.get(index);
        let child_states = element
            .children
            .iter()
            .copied()
            .filter(|c| self.tree.get(*c).kind.is_state_like());

        if element.kind == ElementKind::Parallel {
            return child_states.collect();
        }
        match element.attr("initial") {
            Some(initial) => child_states
                .filter(|c| self.tree.get(*c).id.as_deref() == Some(initial))
                .take(1)
                .collect(),
            None => child_states.take(1).collect(),
        }
    }

    fn compile_if(&mut self, index: ElementIndex, ctx: &BuildContext) -> Option<GraphNodeId> {
        let tree = self.tree;
        let element = tree.get(index);
        let id = self.insert(self.new_node(index, NodeKind::If));
        let child_ctx = ctx.for_child(index);

        let mut branches: Vec<(ElementIndex, Vec<GraphNodeId>)> = vec![(index, Vec::new())];
        for child in element.children.iter().copied() {
            if tree.get(child).kind.is_branch_marker() {
                branches.push((child, Vec::new()));
                continue;
            }
            if let Some(child_id) = self.compile(child, &child_ctx) {
                if let Some((_, members)) = branches.last_mut() {
                    members.push(child_id);
                }
            }
        }

        let conditions: Vec<Branch<'_>> = branches
            .iter()
            .map(|(marker, _)| {
                let marker = tree.get(*marker);
                let cond = marker.attr("cond").unwrap_or("false");
                match marker.kind {
                    ElementKind::If => Branch::If(cond),
                    ElementKind::ElseIf => Branch::ElseIf(cond),
                    _ => Branch::Else,
                }
            })
            .collect();
        let guards = compose_branch_guards(&conditions);

        let mut partitions = Vec::with_capacity(branches.len());
        for (n, ((marker, members), guard)) in branches.into_iter().zip(guards).enumerate() {
            let part_id = GraphNodeId::partition(&id, n);
            let mut part = ExecutionGraphElement::new(
                part_id.clone(),
                part_id.as_str(),
                NodeKind::IfPart,
                marker.position(),
            );
            part.attributes.insert(
                "branch".to_string(),
                tree.get(marker).kind.tag().to_string(),
            );
            part.when = Some(guard);
            part.parent = Some(id.clone());
            part.next = members.clone();
            self.insert(part);
            for member in &members {
                self.adopt(member, &part_id);
            }
            partitions.push(part_id);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.next = partitions;
        }
        Some(id)
    }

    fn compile_transition(
        &mut self,
        index: ElementIndex,
        ctx: &BuildContext,
    ) -> Option<GraphNodeId> {
        let cache_key = self.cache_key(index);
        if let Some(existing) = self.cache.get(&cache_key) {
            return Some(existing.clone());
        }

        let tree = self.tree;
        let element = tree.get(index);
        let mut node = self.new_node(index, NodeKind::Transition);
        node.when = merge_guard(element.attr("event"), element.attr("cond"));
        let id = self.insert(node);
        self.cache.insert(cache_key, id.clone());

        let child_ctx = ctx.for_child(index);
        let mut next = Vec::new();
        for child in element.children.iter().copied() {
            if let Some(child_id) = self.compile(child, &child_ctx) {
                self.adopt(&child_id, &id);
                next.push(child_id);
            }
        }

        let mut target = None;
        if let Some(reference) = element.attr("target") {
            target = self.resolve_target(index, reference);
            if let Some(target_id) = &target {
                next.push(target_id.clone());
            }
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.next = next;
            node.target = target;
        }
        Some(id)
    }

    fn resolve_target(&mut self, transition: ElementIndex, reference: &str) -> Option<GraphNodeId> {
        let tree = self.tree;
        let label = tree.get(transition).label().to_string();
        let Some(found) = self.find_element_by_key(reference) else {
            self.errors.push(
                TransitionTargetError {
                    transition: label,
                    target: reference.to_string(),
                    reason: TargetFailure::NotFound,
                }
                .into(),
            );
            return None;
        };

        let found_kind = &tree.get(found).kind;
        if !found_kind.is_state_like() {
            self.errors.push(
                TransitionTargetError {
                    transition: label,
                    target: reference.to_string(),
                    reason: TargetFailure::NotCompilable {
                        element_type: found_kind.tag().to_string(),
                    },
                }
                .into(),
            );
            return None;
        }

        let target_ctx = BuildContext::rooted_at(tree, found);
        self.compile(found, &target_ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementSpec;

    fn build(spec: ElementSpec) -> (BTreeMap<GraphNodeId, ExecutionGraphElement>, Vec<CompileError>) {
        let tree = ElementTree::new(spec).unwrap();
        let (_, nodes, errors) = GraphBuilder::new(&tree).build();
        (nodes, errors)
    }

    fn id(raw: &str) -> GraphNodeId {
        GraphNodeId::new(raw)
    }

    #[test]
    fn test_state_children_wiring() {
        let spec = ElementSpec::new("workflow").children([
            ElementSpec::new("state").with_id("s1").children([
                ElementSpec::new("onentry").child(ElementSpec::new("log")),
                ElementSpec::new("transition").attr("target", "s2"),
                ElementSpec::new("onexit").child(ElementSpec::new("log")),
            ]),
            ElementSpec::new("state").with_id("s2"),
        ]);
        let (nodes, errors) = build(spec);
        assert!(errors.is_empty(), "{errors:?}");

        let s1 = &nodes[&id("0.0")];
        assert_eq!(s1.next, vec![id("0.0.0"), id("0.0.1"), id("0.0.2")]);
        assert_eq!(s1.run_after, vec![id("0")], "first child is the default initial");

        let transition = &nodes[&id("0.0.1")];
        assert_eq!(transition.run_after, vec![id("0.0")]);
        assert_eq!(transition.target, Some(id("0.1")));
        assert_eq!(transition.parent, Some(id("0.0")));

        let s2 = &nodes[&id("0.1")];
        assert!(s2.run_after.is_empty());
        assert_eq!(s2.parent, Some(id("0")));
    }

    #[test]
    fn test_initial_attribute_gates_named_child() {
        let spec = ElementSpec::new("workflow").attr("initial", "b").children([
            ElementSpec::new("state").with_id("a"),
            ElementSpec::new("state").with_id("b"),
        ]);
        let (nodes, _) = build(spec);
        assert!(nodes[&id("0.0")].run_after.is_empty());
        assert_eq!(nodes[&id("0.1")].run_after, vec![id("0")]);
    }

    #[test]
    fn test_parallel_regions_all_run_after_parent() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("parallel").with_id("p").children([
                ElementSpec::new("state").with_id("r1"),
                ElementSpec::new("state").with_id("r2"),
            ]),
        );
        let (nodes, _) = build(spec);
        assert_eq!(nodes[&id("0.0.0")].run_after, vec![id("0.0")]);
        assert_eq!(nodes[&id("0.0.1")].run_after, vec![id("0.0")]);
    }

    #[test]
    fn test_if_partitions() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("state").with_id("s1").child(
                ElementSpec::new("if").attr("cond", "x==10").children([
                    ElementSpec::new("assign").attr("location", "x").attr("expr", "20"),
                    ElementSpec::new("elseif").attr("cond", "x==11"),
                    ElementSpec::new("log"),
                    ElementSpec::new("else"),
                    ElementSpec::new("assign").attr("location", "x").attr("expr", "30"),
                    ElementSpec::new("log"),
                ]),
            ),
        );
        let (nodes, errors) = build(spec);
        assert!(errors.is_empty());

        let if_node = &nodes[&id("0.0.0")];
        assert_eq!(
            if_node.next,
            vec![id("0.0.0#0"), id("0.0.0#1"), id("0.0.0#2")]
        );

        let first = &nodes[&id("0.0.0#0")];
        assert_eq!(first.sub_type, NodeKind::IfPart);
        assert_eq!(first.when.as_deref(), Some("x==10"));
        assert_eq!(first.next, vec![id("0.0.0.0")]);

        let second = &nodes[&id("0.0.0#1")];
        assert_eq!(second.when.as_deref(), Some("(x==11) && !(x==10)"));
        assert_eq!(second.next, vec![id("0.0.0.2")]);

        let last = &nodes[&id("0.0.0#2")];
        assert_eq!(last.when.as_deref(), Some("true && !(x==10) && !(x==11)"));
        assert_eq!(last.next, vec![id("0.0.0.4"), id("0.0.0.5")]);
        assert_eq!(nodes[&id("0.0.0.5")].parent, Some(id("0.0.0#2")));
    }

    #[test]
    fn test_transition_guard_and_inline_order() {
        let spec = ElementSpec::new("workflow").children([
            ElementSpec::new("state").with_id("s1").child(
                ElementSpec::new("transition")
                    .attr("event", "go")
                    .attr("cond", "ready")
                    .attr("target", "s2")
                    .children([ElementSpec::new("log"), ElementSpec::new("raise").attr("event", "x")]),
            ),
            ElementSpec::new("state").with_id("s2"),
        ]);
        let (nodes, _) = build(spec);
        let transition = &nodes[&id("0.0.0")];
        assert_eq!(transition.when.as_deref(), Some("event=='go' && (ready)"));
        assert_eq!(
            transition.next,
            vec![id("0.0.0.0"), id("0.0.0.1"), id("0.1")],
            "target comes after inline actions"
        );
    }

    #[test]
    fn test_target_compiled_once_when_reached_twice() {
        let spec = ElementSpec::new("workflow").children([
            ElementSpec::new("state").with_id("a").children([
                ElementSpec::new("transition").attr("event", "x").attr("target", "shared"),
                ElementSpec::new("transition").attr("event", "y").attr("target", "shared"),
            ]),
            ElementSpec::new("state")
                .with_id("shared")
                .child(ElementSpec::new("log")),
        ]);
        let (nodes, errors) = build(spec);
        assert!(errors.is_empty());
        let shared_nodes = nodes
            .values()
            .filter(|n| n.element_id.as_deref() == Some("shared"))
            .count();
        assert_eq!(shared_nodes, 1);
        assert_eq!(nodes[&id("0.0.0")].target, Some(id("0.1")));
        assert_eq!(nodes[&id("0.0.1")].target, Some(id("0.1")));
        assert_eq!(nodes[&id("0.1")].parent, Some(id("0")));
    }

    #[test]
    fn test_self_targeting_cycle_terminates() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("state")
                .with_id("loop")
                .child(ElementSpec::new("transition").attr("event", "again").attr("target", "loop")),
        );
        let (nodes, errors) = build(spec);
        assert!(errors.is_empty());
        assert_eq!(nodes[&id("0.0.0")].target, Some(id("0.0")));
    }

    #[test]
    fn test_missing_target_names_transition_and_target() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("state").with_id("s1").child(
                ElementSpec::new("transition")
                    .with_id("go")
                    .attr("target", "X"),
            ),
        );
        let (_, errors) = build(spec);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            CompileError::TransitionTarget(err) => {
                assert_eq!(err.transition, "go");
                assert_eq!(err.target, "X");
                assert_eq!(err.reason, TargetFailure::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_state_target_is_rejected() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("state").with_id("s1").children([
                ElementSpec::new("log").with_id("note"),
                ElementSpec::new("transition").attr("target", "note"),
            ]),
        );
        let (_, errors) = build(spec);
        assert!(matches!(
            &errors[0],
            CompileError::TransitionTarget(TransitionTargetError {
                reason: TargetFailure::NotCompilable { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_target_prefers_state_over_variable_with_same_id() {
        let spec = ElementSpec::new("workflow").children([
            ElementSpec::new("state").with_id("s1").children([
                ElementSpec::new("datamodel")
                    .child(ElementSpec::new("data").with_id("s2").attr("expr", "1")),
                ElementSpec::new("transition").attr("target", "s2"),
            ]),
            ElementSpec::new("state")
                .with_id("s2")
                .child(ElementSpec::new("transition").attr("target", "done")),
            ElementSpec::new("final").with_id("done"),
        ]);
        let (nodes, errors) = build(spec);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(nodes[&id("0.0.1")].target, Some(id("0.1")));
    }

    #[test]
    fn test_unknown_element_is_reported() {
        let spec = ElementSpec::new("workflow").child(
            ElementSpec::new("state")
                .with_id("s1")
                .child(ElementSpec::new("blink").with_id("b")),
        );
        let (_, errors) = build(spec);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "<blink> 'b': element type has no graph construction"
        );
    }

    #[test]
    fn test_llm_inherits_model_from_ancestors() {
        let spec = ElementSpec::new("workflow").attr("model", "small").child(
            ElementSpec::new("state").with_id("s1").children([
                ElementSpec::new("llm").attr("prompt", "hi"),
                ElementSpec::new("llm").attr("prompt", "hi").attr("model", "large"),
            ]),
        );
        let (nodes, _) = build(spec);
        assert_eq!(nodes[&id("0.0.0")].attr("model"), Some("small"));
        assert_eq!(nodes[&id("0.0.1")].attr("model"), Some("large"));
    }
}
