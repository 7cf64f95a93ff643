//! Diagram rendering for compiled graphs
//!
//! Produces Mermaid `stateDiagram-v2` or Graphviz DOT text. A run's visit
//! history can be overlaid so the path actually taken stands out.

use super::{ExecutionGraph, ExecutionGraphElement, GraphNodeId, NodeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Maximum number of trace steps annotated in a diagram
pub const MAX_ANNOTATED_STEPS: usize = 500;

/// Visualization output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationFormat {
    /// Mermaid state diagram
    Mermaid,
    /// DOT graph format
    Dot,
}

impl fmt::Display for VisualizationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisualizationFormat::Mermaid => write!(f, "mermaid"),
            VisualizationFormat::Dot => write!(f, "dot"),
        }
    }
}

impl FromStr for VisualizationFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mermaid" => Ok(Self::Mermaid),
            "dot" => Ok(Self::Dot),
            other => Err(format!("unknown visualization format '{other}'")),
        }
    }
}

/// One visited state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// State entered
    pub state: GraphNodeId,
    /// When it was entered
    pub timestamp: DateTime<Utc>,
}

/// Visit history of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Run id
    pub run_id: String,
    /// Final or current run status
    pub status: String,
    /// States in the order they were entered
    pub steps: Vec<TraceStep>,
}

impl ExecutionTrace {
    fn visited(&self) -> HashSet<&GraphNodeId> {
        self.steps.iter().map(|step| &step.state).collect()
    }

    /// Transitions taken, as consecutive pairs of sibling-level visits
    fn taken_edges(&self) -> HashSet<(&GraphNodeId, &GraphNodeId)> {
        self.steps
            .windows(2)
            .map(|pair| (&pair[0].state, &pair[1].state))
            .collect()
    }
}

/// Renders graphs as diagrams
#[derive(Debug, Clone)]
pub struct ExecutionVisualizer {
    /// Annotate visited states with their step numbers
    pub include_steps: bool,
    /// Show transition guards as edge labels
    pub include_guards: bool,
}

impl Default for ExecutionVisualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionVisualizer {
    /// Visualizer with every annotation enabled
    pub fn new() -> Self {
        Self {
            include_steps: true,
            include_guards: true,
        }
    }

    /// Visualizer that draws structure only
    pub fn minimal() -> Self {
        Self {
            include_steps: false,
            include_guards: false,
        }
    }

    /// Render in the requested format
    pub fn render(
        &self,
        graph: &ExecutionGraph,
        format: VisualizationFormat,
        trace: Option<&ExecutionTrace>,
    ) -> String {
        match format {
            VisualizationFormat::Mermaid => self.generate_mermaid(graph, trace),
            VisualizationFormat::Dot => self.generate_dot(graph, trace),
        }
    }

    /// Mermaid `stateDiagram-v2`
    pub fn generate_mermaid(&self, graph: &ExecutionGraph, trace: Option<&ExecutionTrace>) -> String {
        let mut diagram = String::from("stateDiagram-v2\n");
        let visited = trace.map(ExecutionTrace::visited).unwrap_or_default();

        if let Some(root) = graph.get(&graph.root) {
            self.mermaid_children(graph, root, 1, &mut diagram);
        }

        if let Some(trace) = trace {
            let taken = trace.taken_edges();
            diagram.push_str("\n    %% Execution Path\n");
            if !visited.is_empty() {
                diagram.push_str("    classDef visited fill:#90EE90\n");
                let mut names: Vec<String> = visited.iter().map(|id| mermaid_id(id)).collect();
                names.sort();
                diagram.push_str(&format!("    class {} visited\n", names.join(",")));
            }
            if self.include_steps {
                for (i, step) in trace.steps.iter().take(MAX_ANNOTATED_STEPS).enumerate() {
                    diagram.push_str(&format!(
                        "    note right of {}: Step {}\n",
                        mermaid_id(&step.state),
                        i + 1
                    ));
                }
            }
            let mut taken: Vec<_> = taken.into_iter().collect();
            taken.sort();
            for (from, to) in taken {
                diagram.push_str(&format!(
                    "    %% taken: {} -> {}\n",
                    graph.label(from),
                    graph.label(to)
                ));
            }
        }
        diagram
    }

    fn mermaid_children(
        &self,
        graph: &ExecutionGraph,
        state: &ExecutionGraphElement,
        depth: usize,
        out: &mut String,
    ) {
        let indent = "    ".repeat(depth);
        let children: Vec<&ExecutionGraphElement> = graph.child_states(&state.id).collect();

        for child in &children {
            let name = mermaid_id(&child.id);
            out.push_str(&format!("{indent}state \"{}\" as {name}\n", escape(child.label())));
            if child.run_after.contains(&state.id) {
                out.push_str(&format!("{indent}[*] --> {name}\n"));
            }
            if child.kind() == NodeKind::Final {
                out.push_str(&format!("{indent}{name} --> [*]\n"));
            }
            if graph.child_states(&child.id).next().is_some() {
                out.push_str(&format!("{indent}state {name} {{\n"));
                self.mermaid_children(graph, child, depth + 1, out);
                out.push_str(&format!("{indent}}}\n"));
            }
        }

        for child in &children {
            for transition in graph.transitions_of(&child.id) {
                let Some(target) = &transition.target else {
                    continue;
                };
                let label = self.edge_label(transition);
                let arrow = format!("{} --> {}", mermaid_id(&child.id), mermaid_id(target));
                if label.is_empty() {
                    out.push_str(&format!("{indent}{arrow}\n"));
                } else {
                    out.push_str(&format!("{indent}{arrow}: {}\n", escape(&label)));
                }
            }
        }
    }

    /// Graphviz DOT with compound states drawn as clusters
    pub fn generate_dot(&self, graph: &ExecutionGraph, trace: Option<&ExecutionTrace>) -> String {
        let visited = trace.map(ExecutionTrace::visited).unwrap_or_default();
        let step_numbers: HashMap<&GraphNodeId, usize> = trace
            .map(|t| {
                t.steps
                    .iter()
                    .take(MAX_ANNOTATED_STEPS)
                    .enumerate()
                    .map(|(i, step)| (&step.state, i + 1))
                    .collect()
            })
            .unwrap_or_default();
        let taken = trace.map(ExecutionTrace::taken_edges).unwrap_or_default();

        let mut out = String::from("digraph workflow {\n    compound=true;\n    node [shape=box, style=rounded];\n");
        if let Some(root) = graph.get(&graph.root) {
            self.dot_children(graph, root, 1, &visited, &step_numbers, &mut out);
        }

        for state in graph.states() {
            for transition in graph.transitions_of(&state.id) {
                let Some(target) = &transition.target else {
                    continue;
                };
                let mut attrs = Vec::new();
                let label = self.edge_label(transition);
                if !label.is_empty() {
                    attrs.push(format!("label=\"{}\"", escape(&label)));
                }
                if taken.contains(&(&state.id, target)) {
                    attrs.push("color=green".to_string());
                    attrs.push("penwidth=2".to_string());
                }
                let attrs = if attrs.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", attrs.join(", "))
                };
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\"{attrs};\n",
                    state.id, target
                ));
            }
        }
        out.push_str("}\n");
        out
    }

    fn dot_children(
        &self,
        graph: &ExecutionGraph,
        state: &ExecutionGraphElement,
        depth: usize,
        visited: &HashSet<&GraphNodeId>,
        step_numbers: &HashMap<&GraphNodeId, usize>,
        out: &mut String,
    ) {
        let indent = "    ".repeat(depth);
        for child in graph.child_states(&state.id) {
            let mut label = escape(child.label());
            if self.include_steps {
                if let Some(step) = step_numbers.get(&child.id) {
                    label.push_str(&format!(" (step {step})"));
                }
            }
            let mut attrs = vec![format!("label=\"{label}\"")];
            if child.kind() == NodeKind::Final {
                attrs.push("peripheries=2".to_string());
            }
            if visited.contains(&child.id) {
                attrs.push("style=\"rounded,filled\"".to_string());
                attrs.push("fillcolor=\"#90EE90\"".to_string());
            }

            if graph.child_states(&child.id).next().is_some() {
                out.push_str(&format!(
                    "{indent}subgraph \"cluster_{}\" {{\n{indent}    label=\"{}\";\n",
                    child.id,
                    escape(child.label())
                ));
                out.push_str(&format!(
                    "{indent}    \"{}\" [{}];\n",
                    child.id,
                    attrs.join(", ")
                ));
                self.dot_children(graph, child, depth + 1, visited, step_numbers, out);
                out.push_str(&format!("{indent}}}\n"));
            } else {
                out.push_str(&format!("{indent}\"{}\" [{}];\n", child.id, attrs.join(", ")));
            }
        }
    }

    fn edge_label(&self, transition: &ExecutionGraphElement) -> String {
        if !self.include_guards {
            return String::new();
        }
        match (transition.attr("event"), transition.attr("cond")) {
            (Some(event), Some(cond)) => format!("{event} [{cond}]"),
            (Some(event), None) => event.to_string(),
            (None, Some(cond)) => format!("[{cond}]"),
            (None, None) => String::new(),
        }
    }
}

fn mermaid_id(id: &GraphNodeId) -> String {
    let sanitized: String = id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("n_{sanitized}")
}

fn escape(raw: &str) -> String {
    raw.replace('"', "'")
}
