//! Compile command implementation

use crate::cli::GraphFormat;
use crate::error::{CliResult, IntoCliResult};
use crate::loader::load_graph;
use agentflow::ExecutionGraph;
use std::path::Path;

/// Compile a workflow document and print the graph
pub fn run_compile_command(file: &Path, format: GraphFormat) -> CliResult<()> {
    let graph = load_graph(file)?;
    tracing::info!(
        "Compiled {} into {} nodes",
        file.display(),
        graph.nodes.len()
    );
    print!("{}", render_graph(&graph, format)?);
    Ok(())
}

/// Serialize a graph in the requested format
pub fn render_graph(graph: &ExecutionGraph, format: GraphFormat) -> CliResult<String> {
    match format {
        GraphFormat::Json => serde_json::to_string_pretty(graph)
            .map(|json| json + "\n")
            .cli_general_error(),
        GraphFormat::Yaml => serde_yaml::to_string(graph).cli_general_error(),
    }
}
