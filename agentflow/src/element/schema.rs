//! Per-type structural validation of an element tree
//!
//! Runs before graph construction and reports every problem it finds.

use super::{AllowedChildren, Element, ElementIndex, ElementKind, ElementTree};
use crate::error::{CompileError, CompositionError, ElementError};
use std::collections::HashMap;

/// Validate the whole tree, returning all diagnostics in document order
pub fn validate(tree: &ElementTree) -> Vec<CompileError> {
    let mut errors = Vec::new();

    let root = tree.get(tree.root());
    if !root.kind.is_state_like() && !matches!(root.kind, ElementKind::Unknown(_)) {
        errors.push(
            CompositionError::at(
                &root.key,
                format!("root element must be a state, found <{}>", root.kind),
            )
            .into(),
        );
    }

    let mut seen_ids: HashMap<(Option<ElementIndex>, &str), &str> = HashMap::new();

    for (index, element) in tree.iter() {
        if element.kind == ElementKind::Workflow && index != tree.root() {
            errors.push(
                CompositionError::at(&element.key, "<workflow> is only allowed as the root")
                    .into(),
            );
        }

        check_children(tree, element, &mut errors);
        check_attributes(element, &mut errors);
        check_placement(tree, index, element, &mut errors);

        if let Some(id) = element.id.as_deref() {
            let scope = tree.enclosing_state(index);
            if let Some(first) = seen_ids.insert((scope, id), element.key.as_str()) {
                errors.push(
                    CompositionError::at(
                        &element.key,
                        format!("duplicate id '{id}' in the same state (first declared at {first})"),
                    )
                    .into(),
                );
            }
        }
    }

    errors
}

fn element_error(element: &Element, message: impl Into<String>) -> CompileError {
    ElementError::new(
        element.kind.tag(),
        element.id.clone(),
        &element.key,
        message,
    )
    .into()
}

fn check_children(tree: &ElementTree, element: &Element, errors: &mut Vec<CompileError>) {
    let has_text = element
        .text
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty());

    match element.kind.allowed_children() {
        AllowedChildren::Any => {}
        AllowedChildren::None => {
            if !element.children.is_empty() || has_text {
                errors.push(
                    CompositionError::at(
                        &element.key,
                        format!("<{}> does not accept content", element.kind),
                    )
                    .into(),
                );
            }
        }
        AllowedChildren::TextOnly => {
            if let Some(child) = element.children.first() {
                errors.push(
                    CompositionError::at(
                        &tree.get(*child).key,
                        format!("<{}> only accepts text content", element.kind),
                    )
                    .into(),
                );
            }
        }
        AllowedChildren::Only(tags) => {
            for child in element.children.iter().map(|c| tree.get(*c)) {
                if matches!(child.kind, ElementKind::Unknown(_)) {
                    continue;
                }
                if !tags.contains(&child.kind.tag()) {
                    errors.push(
                        CompositionError::at(
                            &child.key,
                            format!("<{}> is not allowed inside <{}>", child.kind, element.kind),
                        )
                        .into(),
                    );
                }
            }
        }
    }
}

fn check_attributes(element: &Element, errors: &mut Vec<CompileError>) {
    for name in element.kind.required_attributes() {
        let present = if *name == "id" {
            element.id.is_some()
        } else {
            element.attributes.contains_key(*name)
        };
        if !present {
            errors.push(element_error(
                element,
                format!("missing required attribute '{name}'"),
            ));
        }
    }

    if let Some(source) = element.kind.expression_source() {
        let has_text = element
            .text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if !element.attributes.contains_key(source) && !has_text {
            errors.push(element_error(
                element,
                format!("needs an '{source}' attribute or text content"),
            ));
        }
    }

    if element.kind == ElementKind::Transition
        && !["event", "cond", "target"]
            .iter()
            .any(|name| element.attributes.contains_key(*name))
    {
        errors.push(element_error(
            element,
            "transition needs at least one of 'event', 'cond' or 'target'",
        ));
    }
}

fn check_placement(
    tree: &ElementTree,
    index: ElementIndex,
    element: &Element,
    errors: &mut Vec<CompileError>,
) {
    let parent = element.parent.map(|p| tree.get(p));

    match &element.kind {
        ElementKind::ElseIf | ElementKind::Else => {
            if parent.map(|p| &p.kind) != Some(&ElementKind::If) {
                errors.push(
                    CompositionError::at(
                        &element.key,
                        format!("<{}> must be a direct child of <if>", element.kind),
                    )
                    .into(),
                );
            }
        }
        ElementKind::If => {
            let mut else_seen = false;
            for child in element.children.iter().map(|c| tree.get(*c)) {
                if child.kind.is_branch_marker() {
                    if else_seen {
                        errors.push(
                            CompositionError::at(
                                &child.key,
                                "<else> must be the last branch of <if>",
                            )
                            .into(),
                        );
                    }
                    else_seen |= child.kind == ElementKind::Else;
                }
            }
        }
        ElementKind::UserInput => {
            let in_exit_content = tree
                .ancestors(index)
                .take_while(|a| !tree.get(*a).kind.is_state_like())
                .any(|a| {
                    matches!(
                        tree.get(a).kind,
                        ElementKind::Transition | ElementKind::OnExit
                    )
                });
            if in_exit_content {
                errors.push(
                    CompositionError::at(
                        &element.key,
                        "<user-input> is only allowed in state entry content",
                    )
                    .into(),
                );
            }
        }
        _ => {}
    }

    if element.kind.is_state_like() {
        if let Some(initial) = element.attr("initial") {
            let names_child = element.children.iter().any(|c| {
                let child = tree.get(*c);
                child.kind.is_state_like() && child.id.as_deref() == Some(initial)
            });
            if !names_child {
                errors.push(element_error(
                    element,
                    format!("initial state '{initial}' is not a child state"),
                ));
            }
        }
    }
}
