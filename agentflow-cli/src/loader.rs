use crate::error::{CliError, CliResult};
use agentflow::{compile, AgentflowError, ElementTree, EngineConfig, ExecutionGraph};
use std::path::Path;

/// Read a workflow document, choosing the parser by file extension
///
/// `.yaml` and `.yml` are read as YAML, everything else as JSON.
pub fn load_tree(path: &Path) -> agentflow::Result<ElementTree> {
    let source = std::fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    tracing::debug!("Loading workflow from {}", path.display());
    if is_yaml {
        ElementTree::from_yaml(&source)
    } else {
        ElementTree::from_json(&source)
    }
}

/// Read and compile a workflow document
pub fn load_graph(path: &Path) -> CliResult<ExecutionGraph> {
    let tree = load_tree(path).map_err(|error| with_path(path, error))?;
    compile(&tree).map_err(|errors| with_path(path, AgentflowError::Compile(errors)))
}

/// Engine configuration from a file, or defaults plus environment variables
pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| CliError::from(AgentflowError::from(e))),
        None => Ok(EngineConfig::new()),
    }
}

fn with_path(path: &Path, error: AgentflowError) -> CliError {
    let mut error = CliError::from(error);
    error.message = format!("{}: {}", path.display(), error.message);
    error
}
