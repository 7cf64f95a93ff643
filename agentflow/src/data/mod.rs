//! Scoped variable storage
//!
//! Every state-role node of a running graph owns one [`ScopedDataModel`].
//! Scopes live in an arena inside [`DataModel`] and point at their parent by
//! [`ScopeId`], so the hierarchy mirrors the state tree without shared
//! ownership. Lookups walk outward from the requesting scope.

mod accessor;

pub use accessor::{ScopeAccessor, ScopeView};

use crate::graph::GraphNodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Index of a scope in the data model arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(usize);

impl ScopeId {
    /// Arena position
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether descendant scopes may see a variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to the owning scope and every descendant
    #[default]
    Public,
    /// Visible to the owning scope only
    Private,
}

/// How a variable came to exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableOrigin {
    /// `data` declaration
    #[default]
    Declared,
    /// Created by an assignment to an undeclared key
    Assigned,
    /// Supplied by the caller when the run started or resumed
    Input,
    /// Set by the engine, such as `_error`
    System,
}

/// Per-variable metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetadata {
    /// Writes fail when set
    #[serde(default)]
    pub readonly: bool,
    /// Who may read the variable
    #[serde(default)]
    pub visibility: Visibility,
    /// Where the variable came from
    #[serde(default)]
    pub origin: VariableOrigin,
}

impl VariableMetadata {
    /// Public, writable metadata with the given origin
    pub fn with_origin(origin: VariableOrigin) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }
}

/// Errors raised by data model writes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataModelError {
    /// The variable is readonly
    #[error("Variable '{key}' is readonly")]
    ReadOnly {
        /// Variable name
        key: String,
    },
    /// The variable exists but is hidden from the requesting scope
    #[error("Variable '{key}' is not accessible from this scope")]
    NotAccessible {
        /// Variable name
        key: String,
    },
    /// Scope id outside the arena
    #[error("Unknown scope {0}")]
    UnknownScope(usize),
}

/// Result type for data model operations
pub type DataModelResult<T> = Result<T, DataModelError>;

/// Variables owned by one state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedDataModel {
    /// Owning state node
    pub owner: GraphNodeId,
    /// Enclosing scope
    pub parent: Option<ScopeId>,
    /// Local variables
    pub variables: BTreeMap<String, Value>,
    /// Metadata for each local variable
    pub metadata: BTreeMap<String, VariableMetadata>,
}

/// Outcome of resolving a key from a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Visible definition in this scope
    Found(ScopeId),
    /// Only a hidden definition exists, in this scope
    Hidden(ScopeId),
    /// No scope on the path defines the key
    Missing,
}

/// Arena of scopes for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    scopes: Vec<ScopedDataModel>,
    by_owner: HashMap<GraphNodeId, ScopeId>,
}

impl DataModel {
    /// Data model with a root scope owned by `root_owner`
    pub fn new(root_owner: GraphNodeId) -> Self {
        let mut model = Self {
            scopes: Vec::new(),
            by_owner: HashMap::new(),
        };
        model.create_scope(root_owner, None);
        model
    }

    /// Root scope
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Add a scope, or return the existing one for `owner`
    pub fn create_scope(&mut self, owner: GraphNodeId, parent: Option<ScopeId>) -> ScopeId {
        if let Some(existing) = self.by_owner.get(&owner) {
            return *existing;
        }
        let id = ScopeId(self.scopes.len());
        self.by_owner.insert(owner.clone(), id);
        self.scopes.push(ScopedDataModel {
            owner,
            parent,
            variables: BTreeMap::new(),
            metadata: BTreeMap::new(),
        });
        id
    }

    /// Scope owned by a state
    pub fn scope_for(&self, owner: &GraphNodeId) -> Option<ScopeId> {
        self.by_owner.get(owner).copied()
    }

    /// Scope by id
    pub fn scope(&self, id: ScopeId) -> Option<&ScopedDataModel> {
        self.scopes.get(id.0)
    }

    fn scope_mut(&mut self, id: ScopeId) -> DataModelResult<&mut ScopedDataModel> {
        self.scopes
            .get_mut(id.0)
            .ok_or(DataModelError::UnknownScope(id.0))
    }

    /// Number of scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false; the root scope exists from construction
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Parent of a scope
    pub fn parent_of(&self, id: ScopeId) -> Option<ScopeId> {
        self.scope(id).and_then(|scope| scope.parent)
    }

    /// The scope followed by its ancestors, nearest first
    pub fn chain(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(self.scope(id).map(|_| id), move |current| {
            self.parent_of(*current)
        })
    }

    /// Define or redefine a variable in a scope
    pub fn declare(
        &mut self,
        scope: ScopeId,
        key: &str,
        value: Value,
        metadata: VariableMetadata,
    ) -> DataModelResult<()> {
        let scope = self.scope_mut(scope)?;
        scope.variables.insert(key.to_string(), value);
        scope.metadata.insert(key.to_string(), metadata);
        Ok(())
    }

    /// Whether `requesting` may read `key` as defined in `scope`
    ///
    /// The requester must be the scope itself or one of its descendants, and
    /// private variables are only visible to the owning scope.
    pub fn is_variable_accessible(&self, scope: ScopeId, key: &str, requesting: ScopeId) -> bool {
        let Some(owner) = self.scope(scope) else {
            return false;
        };
        let Some(metadata) = owner.metadata.get(key) else {
            return false;
        };
        if !self.chain(requesting).any(|ancestor| ancestor == scope) {
            return false;
        }
        metadata.visibility == Visibility::Public || scope == requesting
    }

    /// Resolve `key` walking outward from `requesting`
    ///
    /// Hidden definitions are skipped so an outer visible definition still
    /// resolves.
    pub fn lookup(&self, requesting: ScopeId, key: &str) -> Lookup {
        let mut hidden = None;
        for scope in self.chain(requesting) {
            let defines = self
                .scope(scope)
                .is_some_and(|s| s.variables.contains_key(key));
            if !defines {
                continue;
            }
            if self.is_variable_accessible(scope, key, requesting) {
                return Lookup::Found(scope);
            }
            hidden.get_or_insert(scope);
        }
        hidden.map(Lookup::Hidden).unwrap_or(Lookup::Missing)
    }

    /// Visible value of `key`
    pub fn get(&self, requesting: ScopeId, key: &str) -> Option<&Value> {
        match self.lookup(requesting, key) {
            Lookup::Found(scope) => self.scope(scope).and_then(|s| s.variables.get(key)),
            Lookup::Hidden(_) | Lookup::Missing => None,
        }
    }

    /// Metadata of the visible definition of `key`
    pub fn metadata(&self, requesting: ScopeId, key: &str) -> Option<VariableMetadata> {
        match self.lookup(requesting, key) {
            Lookup::Found(scope) => self
                .scope(scope)
                .and_then(|s| s.metadata.get(key))
                .copied(),
            Lookup::Hidden(_) | Lookup::Missing => None,
        }
    }

    /// Write `key` from `requesting`
    ///
    /// Replaces the visible definition. A key nobody defines is created in
    /// the root scope. Returns the scope that now holds the value.
    pub fn set(&mut self, requesting: ScopeId, key: &str, value: Value) -> DataModelResult<ScopeId> {
        match self.lookup(requesting, key) {
            Lookup::Found(scope) => {
                let target = self.scope_mut(scope)?;
                if target.metadata.get(key).is_some_and(|m| m.readonly) {
                    return Err(DataModelError::ReadOnly {
                        key: key.to_string(),
                    });
                }
                target.variables.insert(key.to_string(), value);
                Ok(scope)
            }
            Lookup::Hidden(_) => Err(DataModelError::NotAccessible {
                key: key.to_string(),
            }),
            Lookup::Missing => {
                let root = self.root();
                self.declare(
                    root,
                    key,
                    value,
                    VariableMetadata::with_origin(VariableOrigin::Assigned),
                )?;
                Ok(root)
            }
        }
    }

    /// Variables defined directly in a scope
    pub fn local_variables(&self, scope: ScopeId) -> BTreeMap<String, Value> {
        self.scope(scope)
            .map(|s| s.variables.clone())
            .unwrap_or_default()
    }

    /// Every variable visible from `requesting`, inner definitions shadowing outer ones
    pub fn merged_view(&self, requesting: ScopeId) -> Map<String, Value> {
        let mut chain: Vec<ScopeId> = self.chain(requesting).collect();
        chain.reverse();

        let mut merged = Map::new();
        for scope_id in chain {
            let Some(scope) = self.scope(scope_id) else {
                continue;
            };
            for (key, value) in &scope.variables {
                if self.is_variable_accessible(scope_id, key, requesting) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// JSON snapshot keyed by owning state id
    pub fn snapshot(&self) -> Value {
        let scopes: Map<String, Value> = self
            .scopes
            .iter()
            .map(|scope| {
                let variables = scope
                    .variables
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>();
                (scope.owner.to_string(), Value::Object(variables))
            })
            .collect();
        Value::Object(scopes)
    }

    /// Accessor bound to `scope`
    pub fn accessor(&mut self, scope: ScopeId) -> ScopeAccessor<'_> {
        ScopeAccessor::new(self, scope)
    }

    /// Read-only view bound to `scope`
    pub fn view(&self, scope: ScopeId) -> ScopeView<'_> {
        ScopeView::new(self, scope)
    }
}
