//! Visualize command implementation

use crate::cli::DiagramFormat;
use crate::error::{CliResult, IntoCliResult};
use crate::loader::{load_config, load_graph};
use crate::run::parse_input;
use agentflow::{EchoProvider, Engine, ExecutionVisualizer, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments of the visualize command
#[derive(Debug, Clone)]
pub struct VisualizeArgs {
    pub file: PathBuf,
    pub format: DiagramFormat,
    pub trace: bool,
    pub input: String,
    pub minimal: bool,
    pub config: Option<PathBuf>,
}

/// Render a workflow diagram, optionally overlaid with a run
pub async fn run_visualize_command(args: VisualizeArgs) -> CliResult<()> {
    print!("{}", render_diagram(&args).await?);
    Ok(())
}

/// Diagram text for the arguments
pub async fn render_diagram(args: &VisualizeArgs) -> CliResult<String> {
    let graph = load_graph(&args.file)?;
    let visualizer = if args.minimal {
        ExecutionVisualizer::minimal()
    } else {
        ExecutionVisualizer::new()
    };

    let trace = if args.trace {
        let config = load_config(args.config.as_deref())?;
        let input = parse_input(&args.input)?;
        let outcome = Engine::new(config)
            .with_provider(Arc::new(EchoProvider::new()))
            .run_with(&graph, input, RunOptions::default())
            .await
            .cli_general_error()?;
        tracing::info!(
            "Traced run {} ended as {}",
            outcome.run_id,
            outcome.status
        );
        Some(outcome.record.trace())
    } else {
        None
    };

    let mut diagram = visualizer.render(&graph, args.format.into(), trace.as_ref());
    if !diagram.ends_with('\n') {
        diagram.push('\n');
    }
    tracing::debug!("Rendered {} for {}", args.format_name(), args.file.display());
    Ok(diagram)
}

impl VisualizeArgs {
    fn format_name(&self) -> String {
        agentflow::VisualizationFormat::from(self.format).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FLOW: &str = r#"
tag: workflow
children:
  - tag: state
    id: start
    children:
      - tag: transition
        attributes:
          target: done
  - tag: final
    id: done
"#;

    fn args(dir: &TempDir, format: DiagramFormat, trace: bool) -> VisualizeArgs {
        let file = dir.path().join("flow.yaml");
        fs::write(&file, FLOW).unwrap();
        VisualizeArgs {
            file,
            format,
            trace,
            input: "{}".to_string(),
            minimal: false,
            config: None,
        }
    }

    #[tokio::test]
    async fn test_mermaid_diagram() {
        let dir = TempDir::new().unwrap();
        let diagram = render_diagram(&args(&dir, DiagramFormat::Mermaid, false))
            .await
            .unwrap();
        assert!(diagram.starts_with("stateDiagram-v2"));
        assert!(diagram.contains("start"));
        assert!(!diagram.contains("Execution Path"));
    }

    #[tokio::test]
    async fn test_dot_diagram_with_trace() {
        let dir = TempDir::new().unwrap();
        let diagram = render_diagram(&args(&dir, DiagramFormat::Dot, true))
            .await
            .unwrap();
        assert!(diagram.starts_with("digraph"));
        assert!(diagram.contains("done"));
    }
}
