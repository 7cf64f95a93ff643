use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Serialization format for compiled graphs
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphFormat {
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}

/// Diagram format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagramFormat {
    /// Mermaid state diagram
    Mermaid,
    /// Graphviz DOT
    Dot,
}

impl From<DiagramFormat> for agentflow::VisualizationFormat {
    fn from(format: DiagramFormat) -> Self {
        match format {
            DiagramFormat::Mermaid => Self::Mermaid,
            DiagramFormat::Dot => Self::Dot,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "agentflow")]
#[command(version)]
#[command(about = "Compile and run declarative agent workflows")]
#[command(long_about = "
agentflow compiles workflow element trees (JSON or YAML documents) into
execution graphs and runs them as hierarchical state machines.

Example usage:
  agentflow compile flow.yaml              # Check a workflow and print its graph
  agentflow run flow.yaml --input '{}'     # Run a workflow
  agentflow visualize flow.yaml            # Draw a Mermaid state diagram
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine configuration file (YAML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a workflow and print its execution graph
    #[command(long_about = "
Validates a workflow document and prints the compiled execution graph.
Every problem in the document is reported together.

Exit codes:
  0 - The workflow compiled
  1 - The file could not be read
  2 - The document is invalid

Examples:
  agentflow compile flow.yaml
  agentflow compile flow.json --format yaml
")]
    Compile {
        /// Workflow document (.json, .yaml or .yml)
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: GraphFormat,
    },
    /// Run a workflow and print its result
    #[command(long_about = "
Runs a workflow until it completes, fails, is cancelled or pauses.
Ctrl-C cancels the run. Model nodes are served by an offline provider that
echoes their prompt.

Exit codes:
  0 - The run completed
  1 - The run failed, was cancelled or is waiting for input
  2 - The document is invalid

Examples:
  agentflow run flow.yaml --input '{\"name\": \"ada\"}'
  agentflow run flow.yaml --var retries=3 --event start
  agentflow run flow.yaml --respond answer=yes --timeout 30s
  agentflow run flow.yaml --stream
")]
    Run {
        /// Workflow document (.json, .yaml or .yml)
        file: PathBuf,

        /// Workflow input as JSON
        #[arg(long, default_value = "{}")]
        input: String,

        /// Set a workflow variable (key=value, value parsed as JSON when possible)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Queue an external event before the run starts
        #[arg(long = "event", value_name = "NAME")]
        events: Vec<String>,

        /// Answer a user-input location ahead of time (key=value)
        #[arg(long = "respond", value_name = "KEY=VALUE")]
        responses: Vec<String>,

        /// Per-node timeout (e.g. 500ms, 30s, 2m)
        #[arg(long)]
        timeout: Option<String>,

        /// Print model output as it is produced
        #[arg(long)]
        stream: bool,

        /// Print the full run record as JSON instead of the result
        #[arg(long, conflicts_with = "stream")]
        record: bool,
    },
    /// Draw a workflow as a state diagram
    #[command(long_about = "
Renders the compiled graph as a Mermaid state diagram or a Graphviz DOT
graph. With --trace the workflow is run first and the visited states are
highlighted.

Examples:
  agentflow visualize flow.yaml
  agentflow visualize flow.yaml --format dot --trace --input '{}'
")]
    Visualize {
        /// Workflow document (.json, .yaml or .yml)
        file: PathBuf,

        /// Diagram format
        #[arg(long, value_enum, default_value = "mermaid")]
        format: DiagramFormat,

        /// Run the workflow and overlay the visited states
        #[arg(long)]
        trace: bool,

        /// Workflow input as JSON, used with --trace
        #[arg(long, default_value = "{}")]
        input: String,

        /// Hide guard labels and step annotations
        #[arg(long)]
        minimal: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_help_works() {
        let result = Cli::try_parse_from_args(["agentflow", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }

    #[test]
    fn test_cli_no_subcommand() {
        let cli = Cli::try_parse_from_args(["agentflow"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose && !cli.debug && !cli.quiet);
    }

    #[test]
    fn test_compile_defaults_to_json() {
        let cli = Cli::try_parse_from_args(["agentflow", "compile", "flow.yaml"]).unwrap();
        match cli.command {
            Some(Commands::Compile { file, format }) => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(format, GraphFormat::Json);
            }
            other => panic!("expected compile, got {other:?}"),
        }
    }

    #[test]
    fn test_run_collects_repeated_flags() {
        let cli = Cli::try_parse_from_args([
            "agentflow",
            "run",
            "flow.yaml",
            "--var",
            "a=1",
            "--var",
            "b=two",
            "--event",
            "go",
            "--timeout",
            "30s",
            "--stream",
            "-q",
        ])
        .unwrap();
        assert!(cli.quiet);
        match cli.command {
            Some(Commands::Run {
                vars,
                events,
                timeout,
                stream,
                input,
                ..
            }) => {
                assert_eq!(vars, vec!["a=1", "b=two"]);
                assert_eq!(events, vec!["go"]);
                assert_eq!(timeout.as_deref(), Some("30s"));
                assert!(stream);
                assert_eq!(input, "{}");
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_and_record_conflict() {
        let result =
            Cli::try_parse_from_args(["agentflow", "run", "f.yaml", "--stream", "--record"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_visualize_format() {
        let cli =
            Cli::try_parse_from_args(["agentflow", "visualize", "f.yaml", "--format", "dot"])
                .unwrap();
        match cli.command {
            Some(Commands::Visualize { format, trace, .. }) => {
                assert_eq!(format, DiagramFormat::Dot);
                assert!(!trace);
            }
            other => panic!("expected visualize, got {other:?}"),
        }
    }
}
