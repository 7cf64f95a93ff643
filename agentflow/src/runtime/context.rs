//! Per-invocation execution context

use super::run::{Event, RunId};
use crate::data::{DataModel, ScopeAccessor, ScopeId};
use crate::graph::{ExecutionGraphElement, GraphNodeId};
use crate::step::StepValue;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

/// Everything one node invocation may read or change
pub struct ElementExecutionContext<'a> {
    /// Previous step value
    pub input: StepValue,
    /// Caller-supplied workflow input
    pub workflow_input: &'a Value,
    /// Data model access bound to the node's scope
    pub data: ScopeAccessor<'a>,
    /// The node being executed
    pub node: &'a ExecutionGraphElement,
    /// Run id
    pub run_id: RunId,
    /// State whose content is executing
    pub state_id: &'a GraphNodeId,
    /// Event being processed, if any
    pub event: Option<&'a Event>,
    /// Internal event queue for `raise`
    pub raised: &'a mut VecDeque<Event>,
}

impl ElementExecutionContext<'_> {
    /// Attribute of the node
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.node.attr(name)
    }

    /// Expression bindings visible to this node
    pub fn bindings(&self) -> Map<String, Value> {
        let mut bindings = builtin_bindings(self.workflow_input, &self.input, self.event);
        bindings.extend(self.data.all_variables());
        bindings
    }
}

/// Bindings available to every expression: `event`, `_event`, `input` and `result`
pub fn builtin_bindings(workflow_input: &Value, previous: &StepValue, event: Option<&Event>) -> Map<String, Value> {
    let mut bindings = Map::new();
    bindings.insert(
        "event".to_string(),
        Value::String(event.map(|e| e.name.clone()).unwrap_or_default()),
    );
    bindings.insert(
        "_event".to_string(),
        match event {
            Some(event) => json!({ "name": event.name, "data": event.data }),
            None => json!({ "name": "", "data": null }),
        },
    );
    bindings.insert("input".to_string(), workflow_input.clone());
    bindings.insert("result".to_string(), previous.payload());
    bindings
}

/// Bindings for a guard or declaration evaluated outside of a node invocation
pub fn scope_bindings(
    data: &DataModel,
    scope: ScopeId,
    workflow_input: &Value,
    previous: &StepValue,
    event: Option<&Event>,
) -> Map<String, Value> {
    let mut bindings = builtin_bindings(workflow_input, previous, event);
    bindings.extend(data.view(scope).all_variables());
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VariableMetadata;

    #[test]
    fn test_scope_variables_shadow_builtins() {
        let mut data = DataModel::new(GraphNodeId::new("0"));
        let root = data.root();
        data.declare(root, "result", json!("mine"), VariableMetadata::default())
            .unwrap();
        let event = Event::with_data("go", json!({ "n": 1 }));
        let bindings = scope_bindings(
            &data,
            root,
            &json!({ "q": true }),
            &StepValue::Text("prev".into()),
            Some(&event),
        );
        assert_eq!(bindings["result"], json!("mine"));
        assert_eq!(bindings["event"], json!("go"));
        assert_eq!(bindings["_event"]["data"]["n"], json!(1));
        assert_eq!(bindings["input"]["q"], json!(true));
    }

    #[test]
    fn test_no_event_binds_empty_name() {
        let bindings = builtin_bindings(&Value::Null, &StepValue::empty(), None);
        assert_eq!(bindings["event"], json!(""));
        assert_eq!(bindings["result"], Value::Null);
    }
}
