//! Transition selection and exit/entry set computation

use super::context::scope_bindings;
use super::expression::{ExpressionError, ExpressionEvaluator};
use super::run::{Event, WorkflowRun};
use crate::graph::transition::event_matches;
use crate::graph::{ExecutionGraph, ExecutionGraphElement, GraphNodeId, NodeKind};
use std::collections::{BTreeSet, HashSet};

/// Outcome of one selection pass
#[derive(Default)]
pub(crate) struct Selection {
    /// Winning transition
    pub transition: Option<GraphNodeId>,
    /// Guards that failed to evaluate, counted as false
    pub failures: Vec<(GraphNodeId, ExpressionError)>,
}

/// Active states without an active child state, in document order
pub(crate) fn atomic_active<'g>(
    graph: &'g ExecutionGraph,
    active: &BTreeSet<GraphNodeId>,
) -> Vec<&'g ExecutionGraphElement> {
    let mut atomic: Vec<&ExecutionGraphElement> = active
        .iter()
        .filter_map(|id| graph.get(id))
        .filter(|state| {
            !graph
                .child_states(&state.id)
                .any(|child| active.contains(&child.id))
        })
        .collect();
    atomic.sort_by_key(|state| state.order);
    atomic
}

fn is_evented(transition: &ExecutionGraphElement) -> bool {
    transition
        .attr("event")
        .is_some_and(|event| !event.trim().is_empty())
}

/// True when an active state could react to an event
pub(crate) fn awaits_events(graph: &ExecutionGraph, active: &BTreeSet<GraphNodeId>) -> bool {
    active
        .iter()
        .any(|state| graph.transitions_of(state).any(is_evented))
}

/// How one enabled transition is picked when several match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Atomic states are visited in document order, each from itself outward
    /// through its ancestors, and each state's transitions in document order.
    /// The first enabled transition wins; at most one is taken per microstep.
    #[default]
    FirstInDocumentOrder,
}

impl SelectionPolicy {
    /// First enabled transition under this policy
    ///
    /// Without an event only eventless transitions are candidates; with one,
    /// only evented transitions whose descriptor matches it.
    pub(crate) fn select(
        self,
        graph: &ExecutionGraph,
        run: &WorkflowRun,
        evaluator: &ExpressionEvaluator,
        event: Option<&Event>,
    ) -> Selection {
        match self {
            Self::FirstInDocumentOrder => first_in_document_order(graph, run, evaluator, event),
        }
    }
}

fn first_in_document_order(
    graph: &ExecutionGraph,
    run: &WorkflowRun,
    evaluator: &ExpressionEvaluator,
    event: Option<&Event>,
) -> Selection {
    let mut selection = Selection::default();
    let mut seen: HashSet<&GraphNodeId> = HashSet::new();

    for atomic in atomic_active(graph, &run.active) {
        let chain = std::iter::once(atomic).chain(graph.state_ancestors(&atomic.id));
        for state in chain {
            if !seen.insert(&state.id) {
                continue;
            }
            for transition in graph.transitions_of(&state.id) {
                let candidate = match (event, transition.attr("event")) {
                    (None, _) => !is_evented(transition),
                    (Some(event), Some(descriptor)) => event_matches(descriptor, &event.name),
                    (Some(_), None) => false,
                };
                let settled = transition
                    .run_after
                    .iter()
                    .all(|dependency| run.node_status(dependency).is_settled());
                if !candidate || !settled {
                    continue;
                }

                let enabled = match &transition.when {
                    None => true,
                    Some(guard) => {
                        let scope = run.data.scope_for(&state.id).unwrap_or(run.data.root());
                        let bindings = scope_bindings(
                            &run.data,
                            scope,
                            &run.workflow_input,
                            &run.result,
                            event,
                        );
                        match evaluator.evaluate_bool(guard, &bindings) {
                            Ok(enabled) => enabled,
                            Err(error) => {
                                tracing::warn!(
                                    "Guard of transition '{}' failed: {}",
                                    transition.label(),
                                    error
                                );
                                selection.failures.push((transition.id.clone(), error));
                                false
                            }
                        }
                    }
                };
                if enabled {
                    selection.transition = Some(transition.id.clone());
                    return selection;
                }
            }
        }
    }
    selection
}

/// State whose descendants a transition may exit and enter
///
/// Parallel states are never a domain: leaving one region for another exits
/// the parallel and re-enters it with all its regions. `None` means the whole
/// configuration, which only happens when the target is the root itself.
pub(crate) fn transition_domain(
    graph: &ExecutionGraph,
    source: &GraphNodeId,
    target: &GraphNodeId,
) -> Option<GraphNodeId> {
    let source_is_parallel = graph
        .get(source)
        .is_some_and(|node| node.kind() == NodeKind::Parallel);
    if !source_is_parallel && graph.is_descendant(target, source) {
        return Some(source.clone());
    }
    graph
        .state_ancestors(source)
        .into_iter()
        .filter(|ancestor| ancestor.kind() != NodeKind::Parallel)
        .find(|ancestor| graph.is_descendant(target, &ancestor.id))
        .map(|ancestor| ancestor.id.clone())
}

/// Active states strictly inside the domain, innermost first
pub(crate) fn exit_set(
    graph: &ExecutionGraph,
    active: &BTreeSet<GraphNodeId>,
    domain: Option<&GraphNodeId>,
) -> Vec<GraphNodeId> {
    let mut exits: Vec<(usize, usize, GraphNodeId)> = active
        .iter()
        .filter(|state| match domain {
            Some(domain) => graph.is_descendant(state, domain),
            None => true,
        })
        .filter_map(|state| {
            graph
                .get(state)
                .map(|node| (graph.depth(state), node.order, state.clone()))
        })
        .collect();
    exits.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    exits.into_iter().map(|(_, _, state)| state).collect()
}

/// States to enter for a target, outermost first, ending with the target
pub(crate) fn entry_path(
    graph: &ExecutionGraph,
    target: &GraphNodeId,
    domain: Option<&GraphNodeId>,
) -> Vec<GraphNodeId> {
    let mut path: Vec<GraphNodeId> = graph
        .state_ancestors(target)
        .into_iter()
        .filter(|ancestor| match domain {
            Some(domain) => graph.is_descendant(&ancestor.id, domain),
            None => true,
        })
        .map(|ancestor| ancestor.id.clone())
        .collect();
    path.reverse();
    path.push(target.clone());
    path
}
