//! Workflow execution engine
//!
//! The [`Engine`] walks a compiled [`crate::ExecutionGraph`] as a state
//! machine: states are entered and exited, executable content runs in
//! document order, and transitions are selected by evaluating their guards
//! against the scoped data model.

pub mod actions;
pub mod cache;
pub mod context;
pub mod engine;
pub mod expression;
pub mod provider;
pub mod run;
pub mod store;
mod transitions;


pub use actions::{ActionError, ActionResult};
pub use cache::{CacheStats, CelProgramCache};
pub use context::ElementExecutionContext;
pub use engine::{Engine, ResumeContext, RunOptions, RunOutcome};
pub use expression::{ExpressionError, ExpressionEvaluator};
pub use provider::{EchoProvider, LlmRequest, ModelProvider, ProviderError};
pub use run::{Event, NodeStatus, RunId, RunRecord, RunStatus, StepRecord, Suspension, WorkflowRun};
pub use store::RunStore;
pub use transitions::SelectionPolicy;

use crate::data::DataModelError;
use thiserror::Error;

/// Name of the event raised when a node fails
pub const ERROR_EXECUTION_EVENT: &str = "error.execution";

/// Variable holding the latest node failure
pub const ERROR_VARIABLE: &str = "_error";

/// Errors that abort a run or reject a request
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No stored run has the id
    #[error("Run not found: {0}")]
    RunNotFound(String),
    /// The run exists but is not waiting
    #[error("Run {0} is not suspended")]
    NotSuspended(String),
    /// The resume request does not fit the suspended run
    #[error("Invalid resume: {0}")]
    InvalidResume(String),
    /// Maximum transition limit exceeded to prevent infinite loops
    #[error("Maximum transition limit of {limit} exceeded")]
    TransitionLimitExceeded {
        /// The limit that was hit
        limit: usize,
    },
    /// The graph references nodes it does not contain or has an impossible shape
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),
    /// A required attribute is missing on a node
    #[error("Node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Node id
        node: String,
        /// Attribute name
        attribute: String,
    },
    /// Expression evaluation failed outside of a node
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// Data model write rejected outside of a node
    #[error(transparent)]
    DataModel(#[from] DataModelError),
    /// Fatal action failure
    #[error("Action execution failed: {0}")]
    Action(#[from] ActionError),
    /// Generic execution failure
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
