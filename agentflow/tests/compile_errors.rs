//! Compiler diagnostics and target resolution

use agentflow::error::TargetFailure;
use agentflow::{compile, CompileError, ElementSpec, ElementTree, NodeKind};

fn tree(children: impl IntoIterator<Item = ElementSpec>) -> ElementTree {
    ElementTree::new(ElementSpec::new("workflow").children(children)).unwrap()
}

#[test]
fn test_targets_resolve_across_the_whole_tree() {
    let tree = tree([
        ElementSpec::new("state").with_id("left").child(
            ElementSpec::new("state").with_id("deep").child(
                ElementSpec::new("transition")
                    .with_id("jump")
                    .attr("target", "far"),
            ),
        ),
        ElementSpec::new("state").with_id("right").child(
            ElementSpec::new("state")
                .with_id("middle")
                .child(ElementSpec::new("final").with_id("far")),
        ),
    ]);
    let graph = compile(&tree).unwrap();

    let jump = graph
        .nodes
        .values()
        .find(|node| node.kind() == NodeKind::Transition)
        .unwrap();
    let far = graph.find_state("far").unwrap();
    assert_eq!(jump.target.as_ref(), Some(&far.id));
    assert_eq!(jump.next.last(), Some(&far.id));
}

#[test]
fn test_every_problem_is_reported_in_one_pass() {
    let tree = tree([
        ElementSpec::new("state").with_id("s1").children([
            ElementSpec::new("onentry").child(ElementSpec::new("assign").attr("expr", "1")),
            ElementSpec::new("transition")
                .with_id("broken")
                .attr("target", "nowhere"),
        ]),
        ElementSpec::new("state")
            .with_id("s2")
            .child(ElementSpec::new("if")),
    ]);
    let errors = compile(&tree).unwrap_err();
    assert!(errors.len() >= 3, "{errors}");

    let target = errors
        .iter()
        .find_map(|error| match error {
            CompileError::TransitionTarget(target) => Some(target),
            _ => None,
        })
        .unwrap();
    assert_eq!(target.transition, "broken");
    assert_eq!(target.target, "nowhere");
    assert_eq!(target.reason, TargetFailure::NotFound);

    let report = errors.to_string();
    assert!(report.contains("broken"));
    assert!(report.contains("nowhere"));
    assert!(report.contains("location"));
    assert!(report.contains("cond"));
}

#[test]
fn test_transition_into_executable_content_is_rejected() {
    let tree = tree([ElementSpec::new("state").with_id("s1").children([
        ElementSpec::new("onentry").child(
            ElementSpec::new("log")
                .with_id("note")
                .attr("label", "hi"),
        ),
        ElementSpec::new("transition").attr("target", "note"),
    ])]);
    let errors = compile(&tree).unwrap_err();

    assert!(errors.iter().any(|error| matches!(
        error,
        CompileError::TransitionTarget(target)
            if matches!(&target.reason, TargetFailure::NotCompilable { element_type } if element_type == "log")
    )));
}

#[test]
fn test_wrong_root_and_misplaced_children_are_composition_errors() {
    let tree = ElementTree::new(
        ElementSpec::new("assign")
            .attr("location", "a")
            .child(ElementSpec::new("state").with_id("inner")),
    )
    .unwrap();
    let errors = compile(&tree).unwrap_err();
    assert!(errors
        .iter()
        .all(|error| matches!(error, CompileError::Composition(_) | CompileError::Element(_))));
    assert!(errors.to_string().contains("root element must be a state"));
}

#[test]
fn test_documents_need_exactly_one_root() {
    let error = ElementTree::from_json(r#"[{"tag": "workflow"}, {"tag": "workflow"}]"#).unwrap_err();
    assert!(error.to_string().contains("2 root elements"));
}

#[test]
fn test_variable_named_like_a_state_does_not_shadow_the_target() {
    let tree = tree([
        ElementSpec::new("state").with_id("s1").children([
            ElementSpec::new("datamodel")
                .child(ElementSpec::new("data").with_id("s2").attr("expr", "1")),
            ElementSpec::new("transition")
                .with_id("go")
                .attr("target", "s2"),
        ]),
        ElementSpec::new("state")
            .with_id("s2")
            .child(ElementSpec::new("transition").attr("target", "done")),
        ElementSpec::new("final").with_id("done"),
    ]);
    let graph = compile(&tree).unwrap();

    let s2 = graph.find_state("s2").unwrap();
    assert_eq!(s2.kind(), NodeKind::State);
    let go = graph
        .nodes
        .values()
        .find(|node| node.kind() == NodeKind::Transition && node.label() == "go")
        .unwrap();
    assert_eq!(go.target.as_ref(), Some(&s2.id));
}
