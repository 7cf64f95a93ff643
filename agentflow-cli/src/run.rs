//! Run command implementation

use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::EXIT_FAILURE;
use crate::loader::{load_config, load_graph};
use crate::signal_handler::cancel_on_shutdown_signal;
use agentflow::{
    EchoProvider, Engine, EngineConfig, Event, FinishReason, RunOptions, RunOutcome, RunStatus,
    StreamChunk,
};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Arguments of the run command
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub file: PathBuf,
    pub input: String,
    pub vars: Vec<String>,
    pub events: Vec<String>,
    pub responses: Vec<String>,
    pub timeout: Option<String>,
    pub stream: bool,
    pub record: bool,
    pub config: Option<PathBuf>,
}

/// Main entry point for the run command
pub async fn run_workflow_command(args: RunArgs) -> CliResult<()> {
    let graph = load_graph(&args.file)?;
    let config = load_config(args.config.as_deref())?;
    let input = parse_input(&args.input)?;
    let token = CancellationToken::new();
    let options = build_options(&args, &config, token.clone())?;

    cancel_on_shutdown_signal(token)?;
    let engine = Engine::new(config).with_provider(Arc::new(EchoProvider::new()));
    tracing::info!("Starting workflow {}", args.file.display());

    if args.stream {
        return stream_run(&engine, &graph, input, options).await;
    }

    let outcome = engine
        .run_with(&graph, input, options)
        .await
        .cli_general_error()?;

    if args.record {
        let record = serde_json::to_string_pretty(&outcome.record).cli_general_error()?;
        println!("{record}");
    } else {
        let result = serde_json::to_string_pretty(&outcome.result).cli_general_error()?;
        println!("{result}");
    }
    check_outcome(&outcome)
}

async fn stream_run(
    engine: &Engine,
    graph: &agentflow::ExecutionGraph,
    input: Value,
    options: RunOptions,
) -> CliResult<()> {
    let mut chunks = engine.run_stream(graph, input, options);
    let mut stdout = std::io::stdout();
    let mut reason = FinishReason::Error;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            StreamChunk::TextDelta { delta } => {
                print!("{delta}");
                let _ = stdout.flush();
            }
            StreamChunk::Step { node, value } => {
                tracing::debug!("Node '{}' settled: {}", node, value);
            }
            StreamChunk::Finish { reason: finished } => reason = finished,
            StreamChunk::Reasoning { .. } | StreamChunk::ToolCall { .. } => {}
        }
    }
    println!();

    match reason {
        FinishReason::Stop | FinishReason::Length | FinishReason::ToolCalls => Ok(()),
        other => Err(CliError::new(
            format!("Run ended with '{}'", finish_name(other)),
            EXIT_FAILURE,
        )),
    }
}

fn finish_name(reason: FinishReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{reason:?}"))
}

fn check_outcome(outcome: &RunOutcome) -> CliResult<()> {
    match outcome.status {
        RunStatus::Completed => {
            tracing::info!("Run {} completed", outcome.run_id);
            Ok(())
        }
        RunStatus::Paused => {
            let message = match &outcome.record.suspension {
                Some(suspension) => format!(
                    "Run {} is waiting for input '{}'{}; answer it with --respond {}=<value>",
                    outcome.run_id,
                    suspension.location,
                    suspension
                        .prompt
                        .as_deref()
                        .map(|p| format!(" ({p})"))
                        .unwrap_or_default(),
                    suspension.location
                ),
                None => format!("Run {} is waiting for an event", outcome.run_id),
            };
            Err(CliError::new(message, EXIT_FAILURE))
        }
        status => Err(CliError::new(
            format!("Run {} ended as {}", outcome.run_id, status),
            EXIT_FAILURE,
        )),
    }
}

/// Parse the `--input` JSON
pub fn parse_input(input: &str) -> CliResult<Value> {
    serde_json::from_str(input)
        .map_err(|e| CliError::new(format!("Invalid --input JSON: {e}"), EXIT_FAILURE))
}

/// Parse `key=value` pairs; values are JSON when they parse as JSON, strings otherwise
pub fn parse_pairs(pairs: &[String]) -> CliResult<Map<String, Value>> {
    let mut parsed = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::new(
                format!("Invalid variable format: '{pair}'. Use key=value format."),
                EXIT_FAILURE,
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::new(
                format!("Missing variable name in '{pair}'"),
                EXIT_FAILURE,
            ));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

/// Parse a duration such as `500ms`, `30s`, `2m` or `1h`; bare numbers are seconds
pub fn parse_duration(s: &str) -> CliResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CliError::new("Empty duration string", EXIT_FAILURE));
    }

    let (value_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let value: u64 = value_str
        .trim()
        .parse()
        .map_err(|_| CliError::new(format!("Invalid duration value: {value_str}"), EXIT_FAILURE))?;

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => Duration::from_secs(value),
    })
}

fn build_options(
    args: &RunArgs,
    config: &EngineConfig,
    token: CancellationToken,
) -> CliResult<RunOptions> {
    let node_timeout = match &args.timeout {
        Some(timeout) => Some(parse_duration(timeout)?),
        None => config.node_timeout(),
    };
    let responses: HashMap<String, Value> = parse_pairs(&args.responses)?.into_iter().collect();

    Ok(RunOptions {
        cancel: Some(token),
        events: args.events.iter().map(Event::new).collect(),
        variables: parse_pairs(&args.vars)?,
        node_timeout,
        responses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_pairs_prefers_json() {
        let pairs = parse_pairs(&[
            "count=3".to_string(),
            "name=ada".to_string(),
            "flags=[true]".to_string(),
            "expr=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(pairs["count"], json!(3));
        assert_eq!(pairs["name"], json!("ada"));
        assert_eq!(pairs["flags"], json!([true]));
        assert_eq!(pairs["expr"], json!("a=b"));
    }

    #[test]
    fn test_parse_pairs_rejects_missing_equals() {
        let error = parse_pairs(&["novalue".to_string()]).unwrap_err();
        assert!(error.message.contains("key=value"));
        assert!(parse_pairs(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_options_fall_back_to_config_timeout() {
        let config = EngineConfig::default().with_node_timeout(Some(Duration::from_secs(9)));
        let args = RunArgs {
            events: vec!["go".to_string()],
            responses: vec!["answer=yes".to_string()],
            ..RunArgs::default()
        };
        let options = build_options(&args, &config, CancellationToken::new()).unwrap();
        assert_eq!(options.node_timeout, Some(Duration::from_secs(9)));
        assert_eq!(options.events[0].name, "go");
        assert_eq!(options.responses["answer"], json!("yes"));

        let args = RunArgs {
            timeout: Some("250ms".to_string()),
            ..args
        };
        let options = build_options(&args, &config, CancellationToken::new()).unwrap();
        assert_eq!(options.node_timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_failed_run_exits_with_failure_code() {
        let tree = agentflow::ElementTree::from_yaml(
            "tag: workflow\nchildren:\n  - tag: state\n    id: s\n    children:\n      - tag: onentry\n        children:\n          - tag: error\n            attributes:\n              code: broken\n              message: nope\n",
        )
        .unwrap();
        let graph = agentflow::compile(&tree).unwrap();
        let outcome = Engine::default()
            .run_with(&graph, json!({}), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);

        let error = check_outcome(&outcome).unwrap_err();
        assert_eq!(error.exit_code, EXIT_FAILURE);
        assert!(error.message.contains("failed"));
    }

    #[test]
    fn test_invalid_input_json() {
        assert!(parse_input("{not json").is_err());
        assert_eq!(parse_input(r#"{"a": 1}"#).unwrap(), json!({ "a": 1 }));
    }
}
