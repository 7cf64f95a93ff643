//! Cancellation, timeouts and streaming

use agentflow::{
    compile, EchoProvider, ElementSpec, ElementTree, Engine, EngineConfig, ExecutionGraph,
    FinishReason, RunOptions, RunStatus, StepValue, StreamChunk,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn llm_workflow(prompts: &[&str]) -> ExecutionGraph {
    let calls = prompts
        .iter()
        .enumerate()
        .map(|(n, prompt)| {
            ElementSpec::new("llm")
                .attr("prompt", prompt)
                .attr("result", &format!("reply{n}"))
        });
    let tree = ElementTree::new(ElementSpec::new("workflow").child(
        ElementSpec::new("state")
            .with_id("talk")
            .child(ElementSpec::new("onentry").children(calls)),
    ))
    .unwrap();
    compile(&tree).unwrap()
}

fn slow_engine(delay_ms: u64) -> Engine {
    Engine::new(EngineConfig::new())
        .with_provider(Arc::new(EchoProvider::with_delay(Duration::from_millis(delay_ms))))
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_node() {
    let graph = llm_workflow(&["one two three four five six seven eight"]);
    let engine = slow_engine(100);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let outcome = engine
        .run_with(
            &graph,
            json!({}),
            RunOptions {
                cancel: Some(token),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(700));
    match outcome.result {
        StepValue::Error { code, .. } => assert_eq!(code, "cancelled"),
        other => panic!("expected a cancelled error, got {other:?}"),
    }
    assert!(outcome.record.data["0"].get("reply0").is_none());
}

#[tokio::test]
async fn test_node_timeout_fails_the_run() {
    let graph = llm_workflow(&["too many words for the limit"]);
    let engine = slow_engine(100);

    let outcome = engine
        .run_with(
            &graph,
            json!({}),
            RunOptions {
                node_timeout: Some(Duration::from_millis(30)),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    match outcome.result {
        StepValue::Error { code, .. } => assert_eq!(code, "timeout"),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_forwards_deltas_steps_and_finish() {
    let graph = llm_workflow(&["hello streaming world"]);
    let engine = Engine::new(EngineConfig::new()).with_provider(Arc::new(EchoProvider::new()));

    let chunks: Vec<StreamChunk> = engine
        .run_stream(&graph, json!({}), RunOptions::default())
        .collect()
        .await;

    let text: String = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::TextDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "hello streaming world");

    let step = chunks
        .iter()
        .find_map(|chunk| match chunk {
            StreamChunk::Step { value, .. } => Some(value),
            _ => None,
        })
        .unwrap();
    assert_eq!(step["text"], json!("hello streaming world"));

    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Finish {
            reason: FinishReason::Stop
        })
    );
    let finishes = chunks
        .iter()
        .filter(|chunk| matches!(chunk, StreamChunk::Finish { .. }))
        .count();
    assert_eq!(finishes, 1);
}

#[tokio::test]
async fn test_nodes_run_one_after_another() {
    let graph = llm_workflow(&["first reply", "second reply"]);
    let engine = slow_engine(20);

    let outcome = engine
        .run_with(&graph, json!({}), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let vars = &outcome.record.data["0"];
    assert_eq!(vars["reply0"], json!("first reply"));
    assert_eq!(vars["reply1"], json!("second reply"));

    let steps = &outcome.record.steps;
    assert_eq!(steps.len(), 2);
    assert!(steps[0].at <= steps[1].at);
    assert_eq!(steps[1].value["text"], json!("second reply"));
}

#[tokio::test]
async fn test_prompt_templates_see_input_and_variables() {
    let tree = ElementTree::new(ElementSpec::new("workflow").child(
        ElementSpec::new("state").with_id("talk").children([
            ElementSpec::new("datamodel").child(
                ElementSpec::new("data")
                    .with_id("topic")
                    .attr("expr", "'rust'"),
            ),
            ElementSpec::new("onentry").child(
                ElementSpec::new("llm")
                    .attr("prompt", "{{ input.greeting }} {{ topic }}")
                    .attr("result", "reply"),
            ),
        ]),
    ))
    .unwrap();
    let graph = compile(&tree).unwrap();
    let engine = Engine::default().with_provider(Arc::new(EchoProvider::new()));

    let result = engine
        .run(&graph, json!({ "greeting": "hello" }))
        .await
        .unwrap();
    assert_eq!(result, StepValue::Text("hello rust".to_string()));
}
