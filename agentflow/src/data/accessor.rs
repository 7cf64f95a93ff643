use super::{DataModel, DataModelResult, Lookup, ScopeId, VariableMetadata};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Read and write access to the data model from one scope
///
/// Applies the visibility and readonly rules of [`DataModel`]. A hidden
/// variable reads as absent and logs a warning.
pub struct ScopeAccessor<'a> {
    model: &'a mut DataModel,
    scope: ScopeId,
}

impl<'a> ScopeAccessor<'a> {
    /// Accessor for `scope`
    pub fn new(model: &'a mut DataModel, scope: ScopeId) -> Self {
        Self { model, scope }
    }

    /// Scope this accessor is bound to
    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    /// Visible value of `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.view().get_ref(key)
    }

    /// True when `key` resolves to a visible variable
    pub fn has(&self, key: &str) -> bool {
        self.view().has(key)
    }

    /// Write `key`; fails for readonly or hidden variables
    pub fn set(&mut self, key: &str, value: Value) -> DataModelResult<ScopeId> {
        let scope = self.model.set(self.scope, key, value)?;
        tracing::debug!("Set variable '{}' in scope {}", key, scope.index());
        Ok(scope)
    }

    /// Define a variable directly in this scope
    pub fn declare(&mut self, key: &str, value: Value, metadata: VariableMetadata) -> DataModelResult<()> {
        self.model.declare(self.scope, key, value, metadata)
    }

    /// Metadata of the visible definition
    pub fn get_metadata(&self, key: &str) -> Option<VariableMetadata> {
        self.model.metadata(self.scope, key)
    }

    /// Variables defined in this scope only
    pub fn local_variables(&self) -> BTreeMap<String, Value> {
        self.model.local_variables(self.scope)
    }

    /// Every visible variable
    pub fn all_variables(&self) -> Map<String, Value> {
        self.model.merged_view(self.scope)
    }

    /// Enclosing scope
    pub fn parent_scope(&self) -> Option<ScopeId> {
        self.model.parent_of(self.scope)
    }

    /// Read-only view of the same scope
    pub fn view(&self) -> ScopeView<'_> {
        ScopeView::new(&*self.model, self.scope)
    }
}

/// Read-only access from one scope, used while evaluating guards
#[derive(Clone, Copy)]
pub struct ScopeView<'a> {
    model: &'a DataModel,
    scope: ScopeId,
}

impl<'a> ScopeView<'a> {
    /// View of `scope`
    pub fn new(model: &'a DataModel, scope: ScopeId) -> Self {
        Self { model, scope }
    }

    /// Scope this view is bound to
    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    fn get_ref(&self, key: &str) -> Option<&'a Value> {
        match self.model.lookup(self.scope, key) {
            Lookup::Found(_) => self.model.get(self.scope, key),
            Lookup::Hidden(owner) => {
                tracing::warn!(
                    "Variable '{}' is hidden from scope {} (declared private in scope {})",
                    key,
                    self.scope.index(),
                    owner.index()
                );
                None
            }
            Lookup::Missing => None,
        }
    }

    /// Visible value of `key`
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.get_ref(key)
    }

    /// True when `key` resolves to a visible variable
    pub fn has(&self, key: &str) -> bool {
        matches!(self.model.lookup(self.scope, key), Lookup::Found(_))
    }

    /// Every visible variable
    pub fn all_variables(&self) -> Map<String, Value> {
        self.model.merged_view(self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Visibility;
    use crate::graph::GraphNodeId;
    use serde_json::json;

    #[test]
    fn test_accessor_round_trip() {
        let mut model = DataModel::new(GraphNodeId::new("0"));
        let root = model.root();
        let child = model.create_scope(GraphNodeId::new("0.0"), Some(root));

        let mut accessor = model.accessor(child);
        accessor
            .declare("local", json!(1), VariableMetadata::default())
            .unwrap();
        accessor.set("global", json!("g")).unwrap();

        assert!(accessor.has("local"));
        assert_eq!(accessor.get("global"), Some(&json!("g")));
        assert_eq!(accessor.parent_scope(), Some(root));
        assert_eq!(accessor.local_variables().len(), 1);
        assert_eq!(accessor.all_variables().len(), 2);
        assert_eq!(model.view(root).get("local"), None);
    }

    #[test]
    fn test_hidden_variable_reads_as_missing() {
        let mut model = DataModel::new(GraphNodeId::new("0"));
        let root = model.root();
        let child = model.create_scope(GraphNodeId::new("0.0"), Some(root));
        let private = VariableMetadata {
            visibility: Visibility::Private,
            ..VariableMetadata::default()
        };
        model.declare(root, "key", json!("k"), private).unwrap();

        let view = model.view(child);
        assert!(!view.has("key"));
        assert_eq!(view.get("key"), None);
        assert_eq!(model.view(root).get("key"), Some(&json!("k")));
    }
}
