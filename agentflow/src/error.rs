//! Error taxonomy for compilation and execution
//!
//! Compile-time problems are collected into [`CompileErrors`] so tooling can
//! report every issue in one pass. Runtime failures that should be shown to an
//! end user go through [`MaskedError`], which keeps the internal diagnostic
//! apart from the message that is safe to display.

use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::runtime::ExecutorError;
use std::fmt;
use thiserror::Error;

/// Generic error code used when a failure carries no code of its own
pub const SERVER_ERROR_CODE: &str = "server_error";

/// Structural violation in the element tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid composition at {location}: {message}")]
pub struct CompositionError {
    /// Key of the offending element, or `<document>` for whole-tree problems
    pub location: String,
    /// What is wrong
    pub message: String,
}

impl CompositionError {
    /// Error attached to a specific element key
    pub fn at(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: key.into(),
            message: message.into(),
        }
    }

    /// Error about the document as a whole
    pub fn document(message: impl Into<String>) -> Self {
        Self::at("<document>", message)
    }
}

/// Construction or execution failure of a single element
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ElementError {
    /// Tag of the element
    pub element_type: String,
    /// User-declared id, when present
    pub element_id: Option<String>,
    /// System key of the element
    pub key: String,
    /// What went wrong
    pub message: String,
}

impl ElementError {
    /// Create an element error
    pub fn new(
        element_type: impl Into<String>,
        element_id: Option<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            element_type: element_type.into(),
            element_id,
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ElementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.element_id {
            Some(id) => write!(f, "<{}> '{}': {}", self.element_type, id, self.message),
            None => write!(f, "<{}> at {}: {}", self.element_type, self.key, self.message),
        }
    }
}

/// Why a transition target could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFailure {
    /// No element anywhere in the tree has the referenced id
    NotFound,
    /// The element exists but cannot be entered
    NotCompilable {
        /// Tag of the element that was found
        element_type: String,
    },
}

/// Unresolvable or non-compilable transition target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransitionTargetError {
    /// Id (or key) of the transition
    pub transition: String,
    /// The target reference as written
    pub target: String,
    /// Failure reason
    pub reason: TargetFailure,
}

impl fmt::Display for TransitionTargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            TargetFailure::NotFound => write!(
                f,
                "Transition '{}' targets '{}' but no element with that id exists",
                self.transition, self.target
            ),
            TargetFailure::NotCompilable { element_type } => write!(
                f,
                "Transition '{}' targets '{}', a <{}> that cannot be entered",
                self.transition, self.target, element_type
            ),
        }
    }
}

/// Catch-all error with a masked user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{internal}")]
pub struct BaseError {
    /// Diagnostic message for logs
    pub internal: String,
    /// Message safe to show to end users
    pub public: String,
}

impl BaseError {
    /// Create an error whose public message hides the internal one
    pub fn new(internal: impl Into<String>, public: impl Into<String>) -> Self {
        Self {
            internal: internal.into(),
            public: public.into(),
        }
    }

    /// Error with a generic public message
    pub fn masked(internal: impl Into<String>) -> Self {
        Self::new(internal, "An internal error occurred")
    }
}

/// Errors that separate an internal diagnostic from what end users see
pub trait MaskedError: std::error::Error {
    /// Full diagnostic for logging
    fn internal_message(&self) -> String {
        self.to_string()
    }

    /// Message shown to end users
    fn public_message(&self) -> String;

    /// Machine-readable error code
    fn code(&self) -> &str {
        SERVER_ERROR_CODE
    }

    /// Fatal errors abort the run instead of becoming an error step
    fn is_fatal(&self) -> bool {
        false
    }
}

impl MaskedError for BaseError {
    fn internal_message(&self) -> String {
        self.internal.clone()
    }

    fn public_message(&self) -> String {
        self.public.clone()
    }
}

/// A single compile-time diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Structural problem in the tree
    #[error(transparent)]
    Composition(#[from] CompositionError),
    /// Element that failed to compile
    #[error(transparent)]
    Element(#[from] ElementError),
    /// Transition target problem
    #[error(transparent)]
    TransitionTarget(#[from] TransitionTargetError),
    /// Graph-level problem such as a dependency cycle
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Every diagnostic produced by one compilation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    /// Number of diagnostics
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was reported
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over diagnostics in the order they were found
    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }

    /// Append a diagnostic
    pub fn push(&mut self, error: impl Into<CompileError>) {
        self.0.push(error.into());
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation failed with {} error(s):", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        Self(vec![error])
    }
}

impl From<CompositionError> for CompileErrors {
    fn from(error: CompositionError) -> Self {
        Self(vec![CompileError::Composition(error)])
    }
}

impl IntoIterator for CompileErrors {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Top-level error for the library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentflowError {
    /// The element tree did not compile
    #[error(transparent)]
    Compile(#[from] CompileErrors),
    /// A run aborted
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// JSON document could not be read
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML document could not be read
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, AgentflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_target_error_names_both_sides() {
        let error = TransitionTargetError {
            transition: "go".to_string(),
            target: "X".to_string(),
            reason: TargetFailure::NotFound,
        };
        let message = error.to_string();
        assert!(message.contains("'go'"));
        assert!(message.contains("'X'"));
    }

    #[test]
    fn test_element_error_prefers_user_id() {
        let with_id = ElementError::new("log", Some("greet".into()), "0.1", "boom");
        assert_eq!(with_id.to_string(), "<log> 'greet': boom");

        let without_id = ElementError::new("log", None, "0.1", "boom");
        assert_eq!(without_id.to_string(), "<log> at 0.1: boom");
    }

    #[test]
    fn test_base_error_masks_internal_message() {
        let error = BaseError::masked("db password rejected for user admin");
        assert_eq!(error.public_message(), "An internal error occurred");
        assert!(error.internal_message().contains("password"));
        assert_eq!(error.code(), SERVER_ERROR_CODE);
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_compile_errors_display_lists_all() {
        let mut errors = CompileErrors::default();
        errors.push(CompositionError::document("more than one root element"));
        errors.push(ElementError::new("blink", None, "0.2", "no graph construction"));
        let text = errors.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("more than one root"));
        assert!(text.contains("<blink>"));
    }
}
