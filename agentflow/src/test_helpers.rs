//! Test helpers for building element trees and running them

use crate::element::{ElementSpec, ElementTree};
use crate::graph::{compile, ExecutionGraph};

/// `<state id=..>` with children
pub fn state(id: &str, children: impl IntoIterator<Item = ElementSpec>) -> ElementSpec {
    ElementSpec::new("state").with_id(id).children(children)
}

/// `<final id=..>`
pub fn final_state(id: &str) -> ElementSpec {
    ElementSpec::new("final").with_id(id)
}

/// `<onentry>` with children
pub fn onentry(children: impl IntoIterator<Item = ElementSpec>) -> ElementSpec {
    ElementSpec::new("onentry").children(children)
}

/// `<onexit>` with children
pub fn onexit(children: impl IntoIterator<Item = ElementSpec>) -> ElementSpec {
    ElementSpec::new("onexit").children(children)
}

/// `<assign location=.. expr=..>`
pub fn assign(location: &str, expr: &str) -> ElementSpec {
    ElementSpec::new("assign")
        .attr("location", location)
        .attr("expr", expr)
}

/// `<transition target=..>`
pub fn goto(target: &str) -> ElementSpec {
    ElementSpec::new("transition").attr("target", target)
}

/// `<transition event=.. target=..>`
pub fn on(event: &str, target: &str) -> ElementSpec {
    ElementSpec::new("transition")
        .attr("event", event)
        .attr("target", target)
}

/// `<data id=.. expr=..>` inside a `<datamodel>`
pub fn datamodel(declarations: &[(&str, &str)]) -> ElementSpec {
    ElementSpec::new("datamodel").children(
        declarations
            .iter()
            .map(|(id, expr)| ElementSpec::new("data").with_id(id).attr("expr", expr)),
    )
}

/// Compile a workflow root, panicking on errors
pub fn compile_workflow(children: impl IntoIterator<Item = ElementSpec>) -> ExecutionGraph {
    let tree = ElementTree::new(ElementSpec::new("workflow").children(children))
        .unwrap_or_else(|errors| panic!("invalid tree: {errors}"));
    compile(&tree).unwrap_or_else(|errors| panic!("compile failed: {errors}"))
}
