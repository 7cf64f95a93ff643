//! Element tree: the read-only input of the compiler
//!
//! A parser (or a JSON/YAML document) supplies [`ElementSpec`] values. They are
//! flattened into an [`ElementTree`] arena in document pre-order, so an element's
//! index doubles as its document position and parents are plain indices.

pub mod kind;
pub mod schema;

pub use kind::{AllowedChildren, ElementKind, Role};

use crate::error::{CompileErrors, CompositionError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Position of an element in its source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// An element as handed over by the parser
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementSpec {
    /// Element tag such as `state` or `transition`
    #[serde(alias = "elementType")]
    pub tag: String,
    /// User-declared id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parser-supplied key; a path-based key is assigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Attributes; scalar values are stored as strings
    #[serde(default, deserialize_with = "scalar_attributes")]
    pub attributes: BTreeMap<String, String>,
    /// Child elements in document order
    #[serde(default)]
    pub children: Vec<ElementSpec>,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Where the element starts in the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

fn scalar_attributes<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

impl ElementSpec {
    /// Start an element with the given tag
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// Set the user id
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Set the key
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    /// Add an attribute
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Append a child
    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children
    pub fn children(mut self, children: impl IntoIterator<Item = ElementSpec>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set text content
    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ElementDocument {
    One(ElementSpec),
    Many(Vec<ElementSpec>),
}

impl ElementDocument {
    fn into_roots(self) -> Vec<ElementSpec> {
        match self {
            ElementDocument::One(spec) => vec![spec],
            ElementDocument::Many(specs) => specs,
        }
    }
}

/// Index of an element inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementIndex(usize);

impl ElementIndex {
    /// Document pre-order position
    pub fn position(self) -> usize {
        self.0
    }
}

/// A node of the element tree
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Element type
    pub kind: ElementKind,
    /// User-declared id
    pub id: Option<String>,
    /// Unique, stable key
    pub key: String,
    /// Attributes
    pub attributes: BTreeMap<String, String>,
    /// Text content
    pub text: Option<String>,
    /// Children in document order
    pub children: Vec<ElementIndex>,
    /// Parent element
    pub parent: Option<ElementIndex>,
    /// Source position
    pub position: Option<SourcePosition>,
}

impl Element {
    /// Coarse role of the element
    pub fn role(&self) -> Role {
        self.kind.role()
    }

    /// Attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Id when present, key otherwise
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.key)
    }
}

/// Arena holding a whole element document
#[derive(Debug, Clone, PartialEq)]
pub struct ElementTree {
    elements: Vec<Element>,
}

impl ElementTree {
    /// Build a tree from a single root element
    pub fn new(root: ElementSpec) -> Result<Self, CompileErrors> {
        Self::from_roots(vec![root])
    }

    /// Build a tree from a parsed document, which must have exactly one root
    pub fn from_roots(roots: Vec<ElementSpec>) -> Result<Self, CompileErrors> {
        let count = roots.len();
        let root = match roots.into_iter().next() {
            Some(root) if count == 1 => root,
            Some(_) => {
                return Err(CompositionError::document(format!(
                    "document has {count} root elements, expected exactly one"
                ))
                .into())
            }
            None => {
                return Err(CompositionError::document("document has no root element").into())
            }
        };

        let mut tree = Self {
            elements: Vec::new(),
        };
        tree.push(root, None, "0".to_string());
        tree.check_keys()?;
        Ok(tree)
    }

    /// Parse a JSON document (one root object or an array of roots)
    pub fn from_json(source: &str) -> crate::Result<Self> {
        let document: ElementDocument = serde_json::from_str(source)?;
        Ok(Self::from_roots(document.into_roots())?)
    }

    /// Parse a YAML document (one root mapping or a sequence of roots)
    pub fn from_yaml(source: &str) -> crate::Result<Self> {
        let document: ElementDocument = serde_yaml::from_str(source)?;
        Ok(Self::from_roots(document.into_roots())?)
    }

    fn push(&mut self, spec: ElementSpec, parent: Option<ElementIndex>, path: String) -> ElementIndex {
        let index = ElementIndex(self.elements.len());
        let mut attributes = spec.attributes;
        let id = spec.id.or_else(|| attributes.remove("id"));
        attributes.remove("id");

        self.elements.push(Element {
            kind: ElementKind::from_tag(&spec.tag),
            id,
            key: spec.key.unwrap_or_else(|| path.clone()),
            attributes,
            text: spec.text,
            children: Vec::new(),
            parent,
            position: spec.position,
        });

        for (n, child) in spec.children.into_iter().enumerate() {
            let child_index = self.push(child, Some(index), format!("{path}.{n}"));
            self.elements[index.0].children.push(child_index);
        }
        index
    }

    fn check_keys(&self) -> Result<(), CompileErrors> {
        let mut errors = CompileErrors::default();
        let mut seen = HashSet::new();
        for element in &self.elements {
            if element.key.contains('#') {
                errors.push(CompositionError::at(
                    &element.key,
                    "element keys may not contain '#'",
                ));
            }
            if !seen.insert(element.key.as_str()) {
                errors.push(CompositionError::at(&element.key, "duplicate element key"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Root element
    pub fn root(&self) -> ElementIndex {
        ElementIndex(0)
    }

    /// Element at an index produced by this tree
    pub fn get(&self, index: ElementIndex) -> &Element {
        &self.elements[index.0]
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when the tree holds no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All elements in document pre-order
    pub fn iter(&self) -> impl Iterator<Item = (ElementIndex, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .map(|(i, element)| (ElementIndex(i), element))
    }

    /// Proper ancestors, nearest first
    pub fn ancestors(&self, index: ElementIndex) -> impl Iterator<Item = ElementIndex> + '_ {
        std::iter::successors(self.get(index).parent, move |current| {
            self.get(*current).parent
        })
    }

    /// Nearest proper ancestor that is a state
    pub fn enclosing_state(&self, index: ElementIndex) -> Option<ElementIndex> {
        self.ancestors(index)
            .find(|ancestor| self.get(*ancestor).kind.is_state_like())
    }

    /// First element in document order whose user id equals `reference`
    ///
    /// Searches the whole tree, not just the subtree of the caller.
    pub fn find_by_id(&self, reference: &str) -> Option<ElementIndex> {
        self.iter()
            .find(|(_, element)| element.id.as_deref() == Some(reference))
            .map(|(index, _)| index)
    }

    /// First state-like element in document order whose user id equals `reference`
    pub fn find_state_by_id(&self, reference: &str) -> Option<ElementIndex> {
        self.iter()
            .find(|(_, element)| {
                element.kind.is_state_like() && element.id.as_deref() == Some(reference)
            })
            .map(|(index, _)| index)
    }
}
