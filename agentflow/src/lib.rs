//! # agentflow
//!
//! Compiles declarative workflow element trees into execution graphs and runs
//! them as hierarchical state machines for agent pipelines.
//!
//! ## Features
//!
//! - **Compiler**: validates an element tree and lowers it into a serializable
//!   graph of guarded nodes, reporting every problem in one pass
//! - **Scoped data model**: per-state variables with visibility and readonly rules
//! - **Runtime**: document-ordered execution, event-driven transitions, CEL
//!   guards, streaming model output, cancellation, timeouts and resumable
//!   human-in-the-loop steps
//! - **Visualization**: Mermaid and Graphviz renderings with run overlays
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentflow::{compile, ElementSpec, ElementTree, Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = ElementTree::new(ElementSpec::new("workflow").children([
//!     ElementSpec::new("state").with_id("s1").children([
//!         ElementSpec::new("onentry").child(
//!             ElementSpec::new("assign").attr("location", "a").attr("expr", "10"),
//!         ),
//!         ElementSpec::new("transition").attr("target", "done"),
//!     ]),
//!     ElementSpec::new("final").with_id("done"),
//! ]))?;
//!
//! let graph = compile(&tree)?;
//! let result = Engine::new(EngineConfig::new())
//!     .run(&graph, serde_json::json!({}))
//!     .await?;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Shared utilities
pub mod common;

/// Engine configuration
pub mod config;

/// Scoped variable storage
pub mod data;

/// Element tree input
pub mod element;

/// Error types
pub mod error;

/// Execution graph and compiler
pub mod graph;

/// Execution engine
pub mod runtime;

/// Step results
pub mod step;

#[cfg(test)]
mod test_helpers;

pub use config::{ConfigError, EngineConfig};
pub use data::{DataModel, DataModelError, ScopeAccessor, ScopeId, VariableMetadata, Visibility};
pub use element::{ElementKind, ElementSpec, ElementTree, Role};
pub use error::{
    AgentflowError, BaseError, CompileError, CompileErrors, CompositionError, ElementError,
    MaskedError, Result, TransitionTargetError,
};
pub use graph::visualization::{ExecutionVisualizer, VisualizationFormat};
pub use graph::{compile, ExecutionGraph, ExecutionGraphElement, GraphNodeId, NodeKind};
pub use runtime::{
    EchoProvider, Engine, Event, ExecutorError, ExecutorResult, ModelProvider, ResumeContext,
    RunId, RunOptions, RunOutcome, RunRecord, RunStatus,
};
pub use step::{ChunkStream, FinishReason, StepValue, StreamChunk};
