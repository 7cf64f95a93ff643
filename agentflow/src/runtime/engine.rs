//! Workflow execution engine

use super::actions::{
    execute_action, literal_value, render_template, ActionError, ActionServices,
};
use super::context::{scope_bindings, ElementExecutionContext};
use super::expression::ExpressionEvaluator;
use super::provider::ModelProvider;
use super::run::{Event, NodeStatus, RunId, RunRecord, RunStatus, Suspension, WorkflowRun, Work};
use super::store::RunStore;
use super::transitions::{self, Selection, SelectionPolicy};
use super::{ExecutorError, ExecutorResult, ERROR_EXECUTION_EVENT, ERROR_VARIABLE};
use crate::config::EngineConfig;
use crate::data::{Lookup, ScopeId, VariableMetadata, VariableOrigin, Visibility};
use crate::graph::{ExecutionGraph, ExecutionGraphElement, GraphNodeId, NodeKind};
use crate::step::{
    wrap_execution, ChunkStream, FinishReason, StepValue, StreamChunk, CANCELLED_CODE,
    TIMEOUT_CODE,
};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SELECTION: SelectionPolicy = SelectionPolicy::FirstInDocumentOrder;

/// Per-run settings supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Token that stops the run between nodes and interrupts the running node
    pub cancel: Option<CancellationToken>,
    /// External events queued before the run starts
    pub events: Vec<Event>,
    /// Variables written to the workflow scope after early binding
    pub variables: Map<String, Value>,
    /// Per-node timeout overriding the engine configuration
    pub node_timeout: Option<Duration>,
    /// Answers for `user-input` nodes keyed by their `location`
    pub responses: HashMap<String, Value>,
}

/// What a resumed run receives
#[derive(Debug, Clone, Default)]
pub struct ResumeContext {
    /// Answer for the suspended `user-input` node
    pub value: Option<Value>,
    /// Variables written to the workflow scope before continuing
    pub variables: Map<String, Value>,
    /// External event to deliver
    pub event: Option<Event>,
}

impl ResumeContext {
    /// Context answering a suspended `user-input` node
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Context delivering an event to an idle run
    pub fn with_event(event: Event) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }
}

/// Result of driving a run until it stops
#[derive(Debug)]
pub struct RunOutcome {
    /// Run id, usable with [`Engine::resume`] while paused
    pub run_id: RunId,
    /// Status the run stopped in
    pub status: RunStatus,
    /// Accumulated step result
    pub result: StepValue,
    /// Full run record
    pub record: RunRecord,
}

/// Executes compiled workflow graphs
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    provider: Option<Arc<dyn ModelProvider>>,
    store: RunStore,
    evaluator: ExpressionEvaluator,
}

impl Engine {
    /// Engine without a model provider
    pub fn new(config: EngineConfig) -> Self {
        let evaluator = ExpressionEvaluator::new(config.expression_cache_size);
        Self {
            config: Arc::new(config),
            provider: None,
            store: RunStore::new(),
            evaluator,
        }
    }

    /// Use a model provider for `llm` nodes
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Paused runs
    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Expression evaluator shared by every run
    pub fn evaluator(&self) -> &ExpressionEvaluator {
        &self.evaluator
    }

    /// Run a workflow with default options and return its result
    pub async fn run(&self, graph: &ExecutionGraph, input: Value) -> ExecutorResult<StepValue> {
        Ok(self.run_with(graph, input, RunOptions::default()).await?.result)
    }

    /// Run a workflow until it completes, fails, is cancelled or pauses
    pub async fn run_with(
        &self,
        graph: &ExecutionGraph,
        input: Value,
        options: RunOptions,
    ) -> ExecutorResult<RunOutcome> {
        self.execute(graph, input, options, None).await
    }

    /// Run a workflow in the background, streaming chunks as nodes settle
    ///
    /// Model output is forwarded as it arrives, each settled node yields a
    /// `step` chunk and the stream ends with one `finish` chunk.
    pub fn run_stream(
        &self,
        graph: &ExecutionGraph,
        input: Value,
        options: RunOptions,
    ) -> ChunkStream {
        let (sender, receiver) = unbounded();
        let engine = self.clone();
        let graph = graph.clone();
        tokio::spawn(async move {
            let reason = match engine
                .execute(&graph, input, options, Some(sender.clone()))
                .await
            {
                Ok(outcome) => finish_reason(outcome.status),
                Err(error) => {
                    tracing::error!("Streamed run failed: {}", error);
                    FinishReason::Error
                }
            };
            let _ = sender.unbounded_send(StreamChunk::Finish { reason });
        });
        receiver.boxed()
    }

    /// Continue a paused run with default options
    pub async fn resume(
        &self,
        graph: &ExecutionGraph,
        run_id: &RunId,
        state_id: &str,
        context: ResumeContext,
    ) -> ExecutorResult<StepValue> {
        Ok(self
            .resume_with(graph, run_id, state_id, context, RunOptions::default())
            .await?
            .result)
    }

    /// Continue a paused run
    ///
    /// A run suspended on `user-input` must be resumed at the suspended state
    /// with a value. An idle run may be resumed at any active state, usually
    /// with an event.
    pub async fn resume_with(
        &self,
        graph: &ExecutionGraph,
        run_id: &RunId,
        state_id: &str,
        context: ResumeContext,
        options: RunOptions,
    ) -> ExecutorResult<RunOutcome> {
        let mut run = self
            .store
            .take(run_id)
            .ok_or_else(|| ExecutorError::RunNotFound(run_id.to_string()))?;

        if let Err(error) = self.check_resume(graph, &run, state_id, &context) {
            self.store.insert(run);
            return Err(error);
        }
        tracing::info!("Resuming run {} at '{}'", run.id, state_id);

        if let Err(error) = apply_variables(&mut run, &context.variables) {
            self.store.insert(run);
            return Err(error);
        }
        run.external_queue.extend(options.events.iter().cloned());
        run.external_queue.extend(context.event);
        run.responses.extend(options.responses.clone());
        run.status = RunStatus::Running;

        let mut driver = Driver::new(self, graph, &options, None);
        if run.suspension.take().is_some() {
            driver.pending_input = context.value;
        }
        self.finish(driver, run).await
    }

    fn check_resume(
        &self,
        graph: &ExecutionGraph,
        run: &WorkflowRun,
        state_id: &str,
        context: &ResumeContext,
    ) -> ExecutorResult<()> {
        if run.status != RunStatus::Paused {
            return Err(ExecutorError::NotSuspended(run.id.to_string()));
        }
        let state = graph
            .find_state(state_id)
            .ok_or_else(|| ExecutorError::InvalidResume(format!("no state '{state_id}'")))?;

        match &run.suspension {
            Some(suspension) => {
                if state.id != suspension.state {
                    return Err(ExecutorError::InvalidResume(format!(
                        "run is suspended at '{}', not '{}'",
                        graph.label(&suspension.state),
                        state_id
                    )));
                }
                if context.value.is_none() {
                    return Err(ExecutorError::InvalidResume(format!(
                        "a value for '{}' is required",
                        suspension.location
                    )));
                }
            }
            None => {
                if !run.active.contains(&state.id) {
                    return Err(ExecutorError::InvalidResume(format!(
                        "state '{state_id}' is not active"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        graph: &ExecutionGraph,
        input: Value,
        options: RunOptions,
        sink: Option<UnboundedSender<StreamChunk>>,
    ) -> ExecutorResult<RunOutcome> {
        let mut run = WorkflowRun::new(graph.root.clone(), input, self.config.max_history);
        tracing::info!("Starting run {} of workflow '{}'", run.id, graph.label(&graph.root));

        run.responses = options.responses.clone();
        run.external_queue.extend(options.events.iter().cloned());
        let driver = Driver::new(self, graph, &options, sink);
        driver.bind_data(&mut run)?;
        apply_variables(&mut run, &options.variables)?;
        run.agenda.push(Work::Enter {
            state: graph.root.clone(),
            path: Vec::new(),
        });
        self.finish(driver, run).await
    }

    async fn finish(&self, mut driver: Driver<'_>, mut run: WorkflowRun) -> ExecutorResult<RunOutcome> {
        if let Err(error) = driver.drive(&mut run).await {
            run.fail();
            tracing::error!("Run {} aborted: {}", run.id, error);
            return Err(error);
        }

        match run.status {
            RunStatus::Completed => tracing::info!("Run {} completed", run.id),
            RunStatus::Failed => tracing::error!("Run {} failed: {:?}", run.id, run.result),
            RunStatus::Cancelled => tracing::info!("Run {} cancelled", run.id),
            RunStatus::Paused => tracing::info!("Run {} paused", run.id),
            RunStatus::Running => {}
        }

        let outcome = RunOutcome {
            run_id: run.id,
            status: run.status,
            result: run.result.try_clone().unwrap_or_else(StepValue::empty),
            record: run.record(),
        };
        if run.status == RunStatus::Paused {
            self.store.insert(run);
        }
        Ok(outcome)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn finish_reason(status: RunStatus) -> FinishReason {
    match status {
        RunStatus::Completed | RunStatus::Running => FinishReason::Stop,
        RunStatus::Failed => FinishReason::Error,
        RunStatus::Cancelled => FinishReason::Cancelled,
        RunStatus::Paused => FinishReason::Paused,
    }
}

/// Write caller variables into the workflow scope
fn apply_variables(run: &mut WorkflowRun, variables: &Map<String, Value>) -> ExecutorResult<()> {
    let root = run.data.root();
    for (key, value) in variables {
        match run.data.lookup(root, key) {
            Lookup::Found(_) => {
                run.data.set(root, key, value.clone())?;
            }
            Lookup::Hidden(_) | Lookup::Missing => {
                run.data.declare(
                    root,
                    key,
                    value.clone(),
                    VariableMetadata::with_origin(VariableOrigin::Input),
                )?;
            }
        }
    }
    Ok(())
}

/// Why the agenda stopped
enum Flow {
    /// Nothing left to do in this microstep
    Drained,
    /// Waiting for user input
    Suspended,
    /// The run reached a terminal status
    Stopped,
}

/// Drives one run through its macrosteps
struct Driver<'e> {
    engine: &'e Engine,
    graph: &'e ExecutionGraph,
    cancel: CancellationToken,
    node_timeout: Option<Duration>,
    sink: Option<UnboundedSender<StreamChunk>>,
    current_event: Option<Event>,
    pending_input: Option<Value>,
}

impl<'e> Driver<'e> {
    fn new(
        engine: &'e Engine,
        graph: &'e ExecutionGraph,
        options: &RunOptions,
        sink: Option<UnboundedSender<StreamChunk>>,
    ) -> Self {
        Self {
            engine,
            graph,
            cancel: options.cancel.clone().unwrap_or_default(),
            node_timeout: options.node_timeout.or(engine.config.node_timeout()),
            sink,
            current_event: None,
            pending_input: None,
        }
    }

    fn node(&self, id: &GraphNodeId) -> ExecutorResult<&'e ExecutionGraphElement> {
        self.graph
            .get(id)
            .ok_or_else(|| ExecutorError::MalformedGraph(format!("unknown node '{id}'")))
    }

    fn scope_of(&self, run: &WorkflowRun, node: &GraphNodeId) -> ScopeId {
        self.graph
            .owning_state(node)
            .and_then(|state| run.data.scope_for(&state.id))
            .unwrap_or(run.data.root())
    }

    /// Create every scope and evaluate `data` declarations in document order
    fn bind_data(&self, run: &mut WorkflowRun) -> ExecutorResult<()> {
        let mut states: Vec<&ExecutionGraphElement> = self.graph.states().collect();
        states.sort_by_key(|state| state.order);

        for state in &states {
            let parent = self
                .graph
                .state_ancestors(&state.id)
                .first()
                .and_then(|ancestor| run.data.scope_for(&ancestor.id));
            run.data.create_scope(state.id.clone(), parent);
        }

        for state in &states {
            let scope = self.scope_of(run, &state.id);
            for data in self.graph.data_declarations(&state.id) {
                let key = data
                    .element_id
                    .clone()
                    .ok_or_else(|| ExecutorError::MissingAttribute {
                        node: data.id.to_string(),
                        attribute: "id".to_string(),
                    })?;
                let metadata = VariableMetadata {
                    readonly: data.attr("readonly") == Some("true"),
                    visibility: if data.attr("visibility") == Some("private") {
                        Visibility::Private
                    } else {
                        Visibility::Public
                    },
                    origin: VariableOrigin::Declared,
                };

                let value = match (data.attr("expr"), data.text.as_deref()) {
                    (Some(expr), _) => {
                        let bindings = scope_bindings(
                            &run.data,
                            scope,
                            &run.workflow_input,
                            &run.result,
                            None,
                        );
                        match self.engine.evaluator.evaluate(expr, &bindings) {
                            Ok(value) => value,
                            Err(error) => {
                                tracing::warn!("Declaration of '{}' failed: {}", key, error);
                                raise_error(run, &data.id, "expression_error", &error.to_string());
                                Value::Null
                            }
                        }
                    }
                    (None, Some(text)) => literal_value(text.trim()),
                    (None, None) => Value::Null,
                };
                tracing::debug!("Declared '{}' in scope of '{}'", key, state.label());
                run.data.declare(scope, &key, value, metadata)?;
            }
        }
        Ok(())
    }

    /// Run macrosteps until the run stops or waits
    async fn drive(&mut self, run: &mut WorkflowRun) -> ExecutorResult<()> {
        loop {
            match self.run_agenda(run).await? {
                Flow::Drained => {}
                Flow::Suspended | Flow::Stopped => return Ok(()),
            }
            self.current_event = None;

            let selection = SELECTION.select(self.graph, run, &self.engine.evaluator, None);
            if self.apply_selection(run, selection)? {
                continue;
            }
            if !run.internal_queue.is_empty() {
                if let Some(event) = run.internal_queue.pop_front() {
                    self.dispatch(run, event)?;
                }
                continue;
            }
            if let Some(event) = run.external_queue.pop_front() {
                self.dispatch(run, event)?;
                continue;
            }

            if transitions::awaits_events(self.graph, &run.active) {
                tracing::debug!("Run {} is idle and waiting for events", run.id);
                run.status = RunStatus::Paused;
            } else {
                run.complete();
            }
            return Ok(());
        }
    }

    /// Take the selected transition and record guard failures; true when a
    /// transition was taken
    fn apply_selection(&mut self, run: &mut WorkflowRun, selection: Selection) -> ExecutorResult<bool> {
        for (transition, error) in selection.failures {
            raise_error(run, &transition, "expression_error", &error.to_string());
        }
        match selection.transition {
            Some(transition) => {
                self.take_transition(run, &transition)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dispatch(&mut self, run: &mut WorkflowRun, event: Event) -> ExecutorResult<()> {
        tracing::debug!("Processing event '{}'", event.name);
        let selection = SELECTION.select(self.graph, run, &self.engine.evaluator, Some(&event));
        let unhandled_error = event.name == ERROR_EXECUTION_EVENT && selection.transition.is_none();
        let error_data = event.data.clone();
        self.current_event = Some(event);

        if self.apply_selection(run, selection)? {
            return Ok(());
        }
        if unhandled_error {
            let code = error_data
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(crate::error::SERVER_ERROR_CODE);
            let message = error_data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Execution failed");
            run.result = StepValue::error(code, message);
            run.fail();
        } else if let Some(event) = &self.current_event {
            tracing::warn!("Discarding unhandled event '{}'", event.name);
        }
        Ok(())
    }

    fn take_transition(&mut self, run: &mut WorkflowRun, id: &GraphNodeId) -> ExecutorResult<()> {
        let limit = self.engine.config.max_transitions;
        if run.transitions >= limit {
            return Err(ExecutorError::TransitionLimitExceeded { limit });
        }
        run.transitions += 1;

        let transition = self.node(id)?;
        let source = transition.parent.clone().ok_or_else(|| {
            ExecutorError::MalformedGraph(format!("transition '{id}' has no source state"))
        })?;
        run.set_node_status(id, NodeStatus::Completed);

        let content: VecDeque<GraphNodeId> = transition.structural_next().cloned().collect();
        let Some(target) = &transition.target else {
            tracing::info!(
                "Taking targetless transition '{}' in '{}'",
                transition.label(),
                self.graph.label(&source)
            );
            self.push_block(run, content);
            return Ok(());
        };

        tracing::info!(
            "Transition '{}' -> '{}'",
            self.graph.label(&source),
            self.graph.label(target)
        );
        let domain = transitions::transition_domain(self.graph, &source, target);
        let exits = transitions::exit_set(self.graph, &run.active, domain.as_ref());
        let path = transitions::entry_path(self.graph, target, domain.as_ref());

        if let Some((first, rest)) = path.split_first() {
            run.agenda.push(Work::Enter {
                state: first.clone(),
                path: rest.to_vec(),
            });
        }
        self.push_block(run, content);
        for state in exits.iter().rev() {
            run.agenda.push(Work::Exit(state.clone()));
            let exit_content: VecDeque<GraphNodeId> =
                self.graph.exit_content(state).into_iter().collect();
            self.push_block(run, exit_content);
        }
        Ok(())
    }

    fn push_block(&self, run: &mut WorkflowRun, nodes: VecDeque<GraphNodeId>) {
        if !nodes.is_empty() {
            let id = run.new_block_id();
            run.agenda.push(Work::Block { id, nodes });
        }
    }

    /// Work through the agenda until it is empty or the run stops
    async fn run_agenda(&mut self, run: &mut WorkflowRun) -> ExecutorResult<Flow> {
        loop {
            if run.status.is_terminal() {
                return Ok(Flow::Stopped);
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Run {} cancelled between nodes", run.id);
                run.result = StepValue::error(CANCELLED_CODE, "Run was cancelled");
                run.cancel();
                return Ok(Flow::Stopped);
            }
            let Some(work) = run.agenda.pop() else {
                return Ok(Flow::Drained);
            };

            match work {
                Work::Enter { state, path } => self.enter_state(run, state, path),
                Work::Settle { state, path } => self.settle_state(run, &state, path)?,
                Work::Exit(state) => {
                    tracing::debug!("Exiting state '{}'", self.graph.label(&state));
                    run.active.remove(&state);
                    run.set_node_status(&state, NodeStatus::Pending);
                }
                Work::Block { id, mut nodes } => {
                    let Some(node_id) = nodes.pop_front() else {
                        continue;
                    };
                    let node = self.node(&node_id)?;
                    if node.kind() == NodeKind::UserInput {
                        run.agenda.push(Work::Block { id, nodes });
                        if !self.user_input(run, id, node)? {
                            if let Some(Work::Block { nodes, .. }) = run.agenda.last_mut() {
                                nodes.push_front(node_id);
                            }
                            return Ok(Flow::Suspended);
                        }
                        continue;
                    }
                    if !nodes.is_empty() {
                        run.agenda.push(Work::Block { id, nodes });
                    }
                    self.execute(run, id, node).await?;
                }
            }
        }
    }

    fn enter_state(&self, run: &mut WorkflowRun, state: GraphNodeId, path: Vec<GraphNodeId>) {
        tracing::debug!("Entering state '{}'", self.graph.label(&state));
        run.active.insert(state.clone());
        run.set_node_status(&state, NodeStatus::Running);
        run.record_visit(&state);

        let content: VecDeque<GraphNodeId> = self.graph.entry_content(&state).into();
        run.agenda.push(Work::Settle { state, path });
        self.push_block(run, content);
    }

    fn settle_state(
        &self,
        run: &mut WorkflowRun,
        state: &GraphNodeId,
        path: Vec<GraphNodeId>,
    ) -> ExecutorResult<()> {
        run.set_node_status(state, NodeStatus::Completed);
        let node = self.node(state)?;
        if node.kind() == NodeKind::Final {
            self.reach_final(run, node);
            return Ok(());
        }

        let children: Vec<(GraphNodeId, Vec<GraphNodeId>)> = match path.split_first() {
            Some((first, rest)) if node.kind() == NodeKind::Parallel => self
                .graph
                .child_states(state)
                .map(|region| {
                    let path = if &region.id == first {
                        rest.to_vec()
                    } else {
                        Vec::new()
                    };
                    (region.id.clone(), path)
                })
                .collect(),
            Some((first, rest)) => vec![(first.clone(), rest.to_vec())],
            None => self
                .graph
                .child_states(state)
                .filter(|child| {
                    child.run_after.contains(state)
                        && child
                            .run_after
                            .iter()
                            .all(|dependency| run.node_status(dependency).is_settled())
                })
                .map(|child| (child.id.clone(), Vec::new()))
                .collect(),
        };
        for (child, path) in children.into_iter().rev() {
            run.agenda.push(Work::Enter { state: child, path });
        }
        Ok(())
    }

    fn reach_final(&self, run: &mut WorkflowRun, final_state: &ExecutionGraphElement) {
        let ancestors = self.graph.state_ancestors(&final_state.id);
        let Some(parent) = ancestors.first() else {
            run.complete();
            return;
        };
        if parent.id == self.graph.root {
            tracing::info!("Reached final state '{}'", final_state.label());
            run.complete();
            return;
        }

        run.internal_queue
            .push_back(Event::new(format!("done.state.{}", parent.label())));
        if let Some(parallel) = ancestors.get(1).filter(|s| s.kind() == NodeKind::Parallel) {
            let joined = self.graph.child_states(&parallel.id).all(|region| {
                self.graph
                    .child_states(&region.id)
                    .any(|child| child.kind() == NodeKind::Final && run.active.contains(&child.id))
            });
            if joined {
                run.internal_queue
                    .push_back(Event::new(format!("done.state.{}", parallel.label())));
            }
        }
    }

    /// Feed a `user-input` node; false when the run must suspend
    fn user_input(
        &mut self,
        run: &mut WorkflowRun,
        block: u64,
        node: &ExecutionGraphElement,
    ) -> ExecutorResult<bool> {
        let location = node
            .attr("location")
            .ok_or_else(|| ExecutorError::MissingAttribute {
                node: node.id.to_string(),
                attribute: "location".to_string(),
            })?;
        let scope = self.scope_of(run, &node.id);

        let answer = self
            .pending_input
            .take()
            .or_else(|| run.responses.remove(location));
        let Some(answer) = answer else {
            let state = self
                .graph
                .owning_state(&node.id)
                .map(|state| state.id.clone())
                .unwrap_or_else(|| self.graph.root.clone());
            let prompt = node.attr("prompt").map(|prompt| {
                let bindings = scope_bindings(&run.data, scope, &run.workflow_input, &run.result, None);
                render_template(prompt, &bindings).unwrap_or_else(|_| prompt.to_string())
            });
            tracing::info!(
                "Run {} waiting for input '{}' in state '{}'",
                run.id,
                location,
                self.graph.label(&state)
            );
            run.set_node_status(&node.id, NodeStatus::Running);
            run.suspension = Some(Suspension {
                state,
                node: node.id.clone(),
                location: location.to_string(),
                prompt,
            });
            run.status = RunStatus::Paused;
            return Ok(false);
        };

        let value = match run.data.set(scope, location, answer.clone()) {
            Ok(_) => StepValue::Object(answer),
            Err(error) => StepValue::error("data_model_error", error.to_string()),
        };
        self.settle_node(run, block, node, value);
        Ok(true)
    }

    /// Run one node of a block
    async fn execute(
        &self,
        run: &mut WorkflowRun,
        block: u64,
        node: &'e ExecutionGraphElement,
    ) -> ExecutorResult<()> {
        if let Some(guard) = &node.when {
            let scope = self.scope_of(run, &node.id);
            let bindings = scope_bindings(
                &run.data,
                scope,
                &run.workflow_input,
                &run.result,
                self.current_event.as_ref(),
            );
            match self.engine.evaluator.evaluate_bool(guard, &bindings) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Skipping '{}': guard is false", node.id);
                    run.set_node_status(&node.id, NodeStatus::Skipped);
                    return Ok(());
                }
                Err(error) => {
                    run.set_node_status(&node.id, NodeStatus::Errored);
                    self.fail_block(run, block, &node.id, "expression_error", &error.to_string());
                    return Ok(());
                }
            }
        }

        match node.kind() {
            NodeKind::OnEntry | NodeKind::OnExit => {
                run.set_node_status(&node.id, NodeStatus::Completed);
                let children: VecDeque<GraphNodeId> = node.structural_next().cloned().collect();
                if !children.is_empty() {
                    run.agenda.push(Work::Block {
                        id: block,
                        nodes: children,
                    });
                }
                Ok(())
            }
            NodeKind::If => {
                self.branch(run, block, node);
                Ok(())
            }
            NodeKind::Assign
            | NodeKind::Script
            | NodeKind::Log
            | NodeKind::Raise
            | NodeKind::Llm
            | NodeKind::Error => self.invoke(run, block, node).await,
            other => Err(ExecutorError::MalformedGraph(format!(
                "<{other}> node '{}' cannot run as executable content",
                node.id
            ))),
        }
    }

    /// Evaluate every partition guard, then run the first partition that holds
    fn branch(&self, run: &mut WorkflowRun, block: u64, node: &ExecutionGraphElement) {
        let scope = self.scope_of(run, &node.id);
        let bindings = scope_bindings(
            &run.data,
            scope,
            &run.workflow_input,
            &run.result,
            self.current_event.as_ref(),
        );

        let mut outcomes = Vec::with_capacity(node.next.len());
        for partition in &node.next {
            let guard = self
                .graph
                .get(partition)
                .and_then(|p| p.when.as_deref())
                .unwrap_or("true");
            match self.engine.evaluator.evaluate_bool(guard, &bindings) {
                Ok(holds) => outcomes.push((partition, holds)),
                Err(error) => {
                    run.set_node_status(&node.id, NodeStatus::Errored);
                    self.fail_block(run, block, &node.id, "expression_error", &error.to_string());
                    return;
                }
            }
        }

        run.set_node_status(&node.id, NodeStatus::Completed);
        let chosen = outcomes.iter().position(|(_, holds)| *holds);
        for (n, (partition, _)) in outcomes.iter().enumerate() {
            let status = if Some(n) == chosen {
                NodeStatus::Completed
            } else {
                NodeStatus::Skipped
            };
            run.set_node_status(partition, status);
        }

        if let Some(members) = chosen
            .and_then(|n| self.graph.get(outcomes[n].0))
            .map(|partition| partition.next.iter().cloned().collect::<VecDeque<_>>())
        {
            tracing::debug!("Branch '{}' took partition {:?}", node.id, chosen);
            if !members.is_empty() {
                run.agenda.push(Work::Block {
                    id: block,
                    nodes: members,
                });
            }
        }
    }

    /// Run an action node under the timeout and the cancellation token
    async fn invoke(
        &self,
        run: &mut WorkflowRun,
        block: u64,
        node: &'e ExecutionGraphElement,
    ) -> ExecutorResult<()> {
        run.set_node_status(&node.id, NodeStatus::Running);
        let scope = self.scope_of(run, &node.id);
        let state = self
            .graph
            .owning_state(&node.id)
            .map(|state| state.id.clone())
            .unwrap_or_else(|| self.graph.root.clone());

        let outcome = {
            let services = ActionServices {
                evaluator: &self.engine.evaluator,
                provider: self.engine.provider.as_ref(),
            };
            let context = ElementExecutionContext {
                input: run.result.try_clone().unwrap_or_else(StepValue::empty),
                workflow_input: &run.workflow_input,
                data: run.data.accessor(scope),
                node,
                run_id: run.id,
                state_id: &state,
                event: self.current_event.as_ref(),
                raised: &mut run.internal_queue,
            };
            let sink = self.sink.as_ref();
            let behavior = async move {
                let value = wrap_execution(
                    |context, children| execute_action(services, context, children),
                    context,
                    node.next.as_slice(),
                )
                .await?;
                Ok::<_, ActionError>(settle_stream(value, sink).await)
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = with_timeout(self.node_timeout, &node.id, behavior) => Some(result),
            }
        };

        let value = match outcome {
            None => {
                tracing::info!("Node '{}' interrupted by cancellation", node.id);
                let value = StepValue::error(CANCELLED_CODE, "Run was cancelled");
                self.settle_node(run, block, node, value);
                run.cancel();
                return Ok(());
            }
            Some(Err(error)) => {
                run.set_node_status(&node.id, NodeStatus::Errored);
                return Err(error.into());
            }
            Some(Ok(value)) => value,
        };

        let value = match (node.kind(), node.attr("result")) {
            (NodeKind::Llm, Some(location)) if !value.is_error() => {
                match run.data.set(scope, location, value.payload()) {
                    Ok(_) => value,
                    Err(error) => StepValue::error("data_model_error", error.to_string()),
                }
            }
            _ => value,
        };
        self.settle_node(run, block, node, value);
        Ok(())
    }

    /// Record a settled value and route errors
    fn settle_node(&self, run: &mut WorkflowRun, block: u64, node: &ExecutionGraphElement, value: StepValue) {
        let status = if value.is_error() {
            NodeStatus::Errored
        } else {
            NodeStatus::Completed
        };
        run.set_node_status(&node.id, status);
        run.record_step(&node.id, node.kind(), &value);
        if let Some(sink) = &self.sink {
            let _ = sink.unbounded_send(StreamChunk::Step {
                node: node.id.to_string(),
                value: value.to_json(),
            });
        }

        let failure = match &value {
            StepValue::Error { code, message } if code != CANCELLED_CODE => {
                Some((code.clone(), message.clone()))
            }
            _ => None,
        };
        run.result = value;
        if let Some((code, message)) = failure {
            self.fail_block(run, block, &node.id, &code, &message);
        }
    }

    /// Drop the rest of the failing block and raise `error.execution`
    fn fail_block(&self, run: &mut WorkflowRun, block: u64, node: &GraphNodeId, code: &str, message: &str) {
        while matches!(run.agenda.last(), Some(Work::Block { id, .. }) if *id == block) {
            run.agenda.pop();
        }
        raise_error(run, node, code, message);
    }
}

/// Store `_error` in the workflow scope and queue `error.execution`
fn raise_error(run: &mut WorkflowRun, node: &GraphNodeId, code: &str, message: &str) {
    tracing::warn!("Node '{}' failed with {}: {}", node, code, message);
    let error = json!({ "code": code, "message": message, "node": node.as_str() });
    let root = run.data.root();
    if let Err(e) = run.data.declare(
        root,
        ERROR_VARIABLE,
        error.clone(),
        VariableMetadata::with_origin(VariableOrigin::System),
    ) {
        tracing::warn!("Could not record {}: {}", ERROR_VARIABLE, e);
    }
    run.internal_queue
        .push_back(Event::with_data(ERROR_EXECUTION_EVENT, error));
}

async fn with_timeout<F, E>(limit: Option<Duration>, node: &GraphNodeId, future: F) -> Result<StepValue, E>
where
    F: Future<Output = Result<StepValue, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Node '{}' timed out after {:?}", node, limit);
                Ok(StepValue::error(
                    TIMEOUT_CODE,
                    format!("Node timed out after {} ms", limit.as_millis()),
                ))
            }
        },
        None => future.await,
    }
}

/// Fold a streamed value into text or tool calls, forwarding chunks
async fn settle_stream(value: StepValue, sink: Option<&UnboundedSender<StreamChunk>>) -> StepValue {
    let StepValue::Stream(mut stream) = value else {
        return value;
    };
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut failed = false;

    while let Some(chunk) = stream.next().await {
        match &chunk {
            StreamChunk::TextDelta { delta } => text.push_str(delta),
            StreamChunk::ToolCall { call } => calls.push(call.clone()),
            StreamChunk::Finish { reason } => {
                failed = *reason == FinishReason::Error;
                continue;
            }
            StreamChunk::Reasoning { .. } | StreamChunk::Step { .. } => {}
        }
        if let Some(sink) = sink {
            let _ = sink.unbounded_send(chunk);
        }
    }

    if failed {
        let message = if text.is_empty() {
            "Model output ended with an error".to_string()
        } else {
            text
        };
        StepValue::error("provider_error", message)
    } else if !calls.is_empty() {
        StepValue::ToolCalls(calls)
    } else {
        StepValue::Text(text)
    }
}
