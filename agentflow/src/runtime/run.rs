//! Runtime state of one workflow run

use crate::common::generate_monotonic_ulid;
use crate::data::DataModel;
use crate::graph::visualization::{ExecutionTrace, TraceStep};
use crate::graph::{GraphNodeId, NodeKind};
use crate::step::StepValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique identifier for workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// New monotonic run id
    pub fn new() -> Self {
        Self(generate_monotonic_ulid())
    }

    /// Parse a run id from its string form
    pub fn parse(s: &str) -> Result<Self, String> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| format!("Invalid run ID '{s}': {e}"))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Currently executing
    Running,
    /// Reached a top-level final state or ran out of work
    Completed,
    /// Aborted by an unhandled error
    Failed,
    /// Stopped through the cancellation token
    Cancelled,
    /// Waiting for user input or events
    Paused,
}

impl RunStatus {
    /// True when the run can never continue
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not started, or a state that has been exited
    Pending,
    /// Started and not yet settled
    Running,
    /// Settled normally
    Completed,
    /// Settled with an error value
    Errored,
    /// Guard was false
    Skipped,
}

impl NodeStatus {
    /// True once the node has finished, whatever the outcome
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Skipped)
    }
}

/// A named event with optional payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event name
    pub name: String,
    /// Payload
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Event without payload
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
        }
    }

    /// Event with payload
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// One settled node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Node id
    pub node: GraphNodeId,
    /// Node kind
    pub kind: NodeKind,
    /// Settled value in tagged JSON form
    pub value: Value,
    /// When it settled
    pub at: DateTime<Utc>,
}

/// Where a paused run waits for input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// State owning the waiting node
    pub state: GraphNodeId,
    /// The `user-input` node
    pub node: GraphNodeId,
    /// Variable receiving the answer
    pub location: String,
    /// Prompt shown to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Pending unit of work on the run agenda
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Work {
    /// Enter a state; `path` lists descendants to enter instead of the default initial children
    Enter {
        state: GraphNodeId,
        path: Vec<GraphNodeId>,
    },
    /// Entry content of a state finished
    Settle {
        state: GraphNodeId,
        path: Vec<GraphNodeId>,
    },
    /// Exit content of a state finished
    Exit(GraphNodeId),
    /// Executable content run in document order; nested blocks share the id
    Block {
        id: u64,
        nodes: VecDeque<GraphNodeId>,
    },
}

/// Serializable summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id
    pub id: RunId,
    /// Status
    pub status: RunStatus,
    /// Visited states with timestamps
    pub history: Vec<TraceStep>,
    /// Settled nodes
    pub steps: Vec<StepRecord>,
    /// Variables by owning state
    pub data: Value,
    /// Final or latest step value
    pub result: Value,
    /// Where the run waits, when paused for input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Visit history as a visualization trace
    pub fn trace(&self) -> ExecutionTrace {
        ExecutionTrace {
            run_id: self.id.to_string(),
            status: self.status.to_string(),
            steps: self.history.clone(),
        }
    }
}

/// Runtime execution state for a workflow
#[derive(Debug)]
pub struct WorkflowRun {
    /// Unique identifier for this run
    pub id: RunId,
    /// Run status
    pub status: RunStatus,
    /// Caller-supplied input, bound as `input`
    pub workflow_input: Value,
    /// Scoped variables
    pub data: DataModel,
    /// Active states
    pub active: BTreeSet<GraphNodeId>,
    /// Per-node lifecycle
    pub node_status: HashMap<GraphNodeId, NodeStatus>,
    /// State visits in order
    pub history: Vec<TraceStep>,
    /// Settled nodes in order
    pub steps: Vec<StepRecord>,
    /// Events raised during the run
    pub internal_queue: VecDeque<Event>,
    /// Events supplied by the caller
    pub external_queue: VecDeque<Event>,
    /// Latest settled step value
    pub result: StepValue,
    /// Set while paused on a `user-input` node
    pub suspension: Option<Suspension>,
    /// Transitions taken so far
    pub transitions: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    pub(crate) agenda: Vec<Work>,
    pub(crate) responses: HashMap<String, Value>,
    pub(crate) next_block: u64,
    max_history: usize,
}

impl WorkflowRun {
    /// Fresh run over a graph rooted at `root`
    pub fn new(root: GraphNodeId, workflow_input: Value, max_history: usize) -> Self {
        Self {
            id: RunId::new(),
            status: RunStatus::Running,
            workflow_input,
            data: DataModel::new(root),
            active: BTreeSet::new(),
            node_status: HashMap::new(),
            history: Vec::new(),
            steps: Vec::new(),
            internal_queue: VecDeque::new(),
            external_queue: VecDeque::new(),
            result: StepValue::empty(),
            suspension: None,
            transitions: 0,
            started_at: Utc::now(),
            completed_at: None,
            agenda: Vec::new(),
            responses: HashMap::new(),
            next_block: 0,
            max_history,
        }
    }

    /// Status of a node, `Pending` when never touched
    pub fn node_status(&self, node: &GraphNodeId) -> NodeStatus {
        self.node_status
            .get(node)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    pub(crate) fn set_node_status(&mut self, node: &GraphNodeId, status: NodeStatus) {
        self.node_status.insert(node.clone(), status);
    }

    pub(crate) fn new_block_id(&mut self) -> u64 {
        self.next_block += 1;
        self.next_block
    }

    /// Record a state visit
    pub fn record_visit(&mut self, state: &GraphNodeId) {
        if self.history.len() >= self.max_history {
            self.history.remove(0);
        }
        self.history.push(TraceStep {
            state: state.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Record a settled node
    pub fn record_step(&mut self, node: &GraphNodeId, kind: NodeKind, value: &StepValue) {
        if self.steps.len() >= self.max_history {
            self.steps.remove(0);
        }
        self.steps.push(StepRecord {
            node: node.clone(),
            kind,
            value: value.to_json(),
            at: Utc::now(),
        });
    }

    /// Mark the run as completed
    pub fn complete(&mut self) {
        self.finish(RunStatus::Completed);
    }

    /// Mark the run as failed
    pub fn fail(&mut self) {
        self.finish(RunStatus::Failed);
    }

    /// Mark the run as cancelled
    pub fn cancel(&mut self) {
        self.finish(RunStatus::Cancelled);
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.agenda.clear();
        self.suspension = None;
    }

    /// Visit history as a visualization trace
    pub fn trace(&self) -> ExecutionTrace {
        ExecutionTrace {
            run_id: self.id.to_string(),
            status: self.status.to_string(),
            steps: self.history.clone(),
        }
    }

    /// Serializable summary
    pub fn record(&self) -> RunRecord {
        RunRecord {
            id: self.id,
            status: self.status,
            history: self.history.clone(),
            steps: self.steps.clone(),
            data: self.data.snapshot(),
            result: self.result.to_json(),
            suspension: self.suspension.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}
