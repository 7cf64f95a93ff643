//! Execution of action nodes
//!
//! One `match` over [`NodeKind`] dispatches every executable element.
//! Structural nodes (`if`, containers, states) are driven by the engine and
//! `user-input` needs the run's suspension machinery, so neither reaches
//! [`execute_action`].

use super::context::ElementExecutionContext;
use super::expression::{ExpressionError, ExpressionEvaluator};
use super::provider::{LlmRequest, ModelProvider, ProviderError};
use super::run::Event;
use crate::data::DataModelError;
use crate::error::MaskedError;
use crate::graph::{GraphNodeId, NodeKind};
use crate::step::{to_step_value, StepValue};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Default code of an `error` element
pub const ELEMENT_ERROR_CODE: &str = "element_error";

/// Errors from action execution
#[derive(Debug, Error)]
pub enum ActionError {
    /// An expression failed to compile or evaluate
    #[error("Expression failed: {0}")]
    Expression(#[from] ExpressionError),
    /// A data model write was rejected
    #[error("Variable operation failed: {0}")]
    DataModel(#[from] DataModelError),
    /// A Liquid template failed to parse or render
    #[error("Template rendering failed: {0}")]
    Template(String),
    /// The model provider failed
    #[error("Model call failed: {0}")]
    Provider(#[from] ProviderError),
    /// An `llm` node ran without a provider
    #[error("No model provider is configured")]
    NoProvider,
    /// A required attribute is absent from the compiled node
    #[error("<{element}> node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Element type
        element: String,
        /// Node id
        node: String,
        /// Attribute name
        attribute: String,
    },
    /// The node cannot be executed as an action
    #[error("Malformed graph: {0}")]
    Malformed(String),
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;

impl MaskedError for ActionError {
    fn public_message(&self) -> String {
        match self {
            Self::Expression(_) => "Expression evaluation failed".to_string(),
            Self::DataModel(error) => error.to_string(),
            Self::Template(_) => "Template rendering failed".to_string(),
            Self::Provider(error) => error.public_message(),
            Self::NoProvider => self.to_string(),
            Self::MissingAttribute { .. } | Self::Malformed(_) => {
                "The workflow definition is invalid".to_string()
            }
        }
    }

    fn code(&self) -> &str {
        match self {
            Self::Expression(_) => "expression_error",
            Self::DataModel(_) => "data_model_error",
            Self::Template(_) => "template_error",
            Self::Provider(error) => error.code(),
            Self::NoProvider => ELEMENT_ERROR_CODE,
            Self::MissingAttribute { .. } | Self::Malformed(_) => "malformed_graph",
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingAttribute { .. } | Self::Malformed(_))
    }
}

/// Shared services available to actions
#[derive(Clone, Copy)]
pub struct ActionServices<'e> {
    /// Expression evaluator
    pub evaluator: &'e ExpressionEvaluator,
    /// Model provider for `llm`
    pub provider: Option<&'e Arc<dyn ModelProvider>>,
}

fn required<'a>(ctx: &'a ElementExecutionContext<'_>, name: &str) -> ActionResult<&'a str> {
    ctx.attr(name).ok_or_else(|| ActionError::MissingAttribute {
        element: ctx.node.kind().to_string(),
        node: ctx.node.id.to_string(),
        attribute: name.to_string(),
    })
}

/// Source of an `assign`/`script` expression: the `expr` attribute, else the text
fn expression_source<'a>(ctx: &'a ElementExecutionContext<'_>) -> Option<&'a str> {
    ctx.attr("expr")
        .or(ctx.node.text.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Value of a `data` or `assign` body: JSON when it parses, a string otherwise
pub fn literal_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Render a Liquid template against the given variables
pub fn render_template(template: &str, variables: &Map<String, Value>) -> ActionResult<String> {
    let mut globals = liquid::Object::new();
    for (key, value) in variables {
        globals.insert(
            key.clone().into(),
            liquid::model::to_value(value).unwrap_or(liquid::model::Value::Nil),
        );
    }
    let template = liquid::ParserBuilder::with_stdlib()
        .build()
        .and_then(|parser| parser.parse(template))
        .map_err(|e| ActionError::Template(e.to_string()))?;
    template
        .render(&globals)
        .map_err(|e| ActionError::Template(e.to_string()))
}

/// Execute one action node
pub async fn execute_action(
    services: ActionServices<'_>,
    mut ctx: ElementExecutionContext<'_>,
    children: &[GraphNodeId],
) -> ActionResult<StepValue> {
    if !children.is_empty() {
        return Err(ActionError::Malformed(format!(
            "action node '{}' has nested nodes",
            ctx.node.id
        )));
    }
    tracing::debug!("Executing <{}> node '{}'", ctx.node.kind(), ctx.node.id);

    match ctx.node.kind() {
        NodeKind::Assign => {
            let location = required(&ctx, "location")?.to_string();
            let value = match (ctx.attr("expr"), ctx.node.text.as_deref()) {
                (Some(expr), _) => services.evaluator.evaluate(expr, &ctx.bindings())?,
                (None, Some(text)) => literal_value(text.trim()),
                (None, None) => Value::Null,
            };
            ctx.data.set(&location, value.clone())?;
            Ok(StepValue::Object(value))
        }
        NodeKind::Script => {
            let source = expression_source(&ctx).ok_or_else(|| ActionError::MissingAttribute {
                element: "script".to_string(),
                node: ctx.node.id.to_string(),
                attribute: "expr".to_string(),
            })?;
            let value = services.evaluator.evaluate(source, &ctx.bindings())?;
            if let Some(location) = ctx.attr("result").map(str::to_string) {
                ctx.data.set(&location, value.clone())?;
            }
            Ok(to_step_value(value))
        }
        NodeKind::Log => {
            let bindings = ctx.bindings();
            let label = match ctx.attr("label") {
                Some(label) => Some(render_template(label, &bindings)?),
                None => None,
            };
            let value = match ctx.attr("expr") {
                Some(expr) => Some(services.evaluator.evaluate(expr, &bindings)?),
                None => None,
            };
            let message = match (label, value) {
                (Some(label), Some(Value::String(s))) => format!("{label}: {s}"),
                (Some(label), Some(value)) => format!("{label}: {value}"),
                (Some(label), None) => label,
                (None, Some(Value::String(s))) => s,
                (None, Some(value)) => value.to_string(),
                (None, None) => String::new(),
            };
            emit_log(ctx.attr("level"), ctx.state_id, &message);
            Ok(StepValue::Text(message))
        }
        NodeKind::Raise => {
            let name = required(&ctx, "event")?.to_string();
            let data = match ctx.attr("data") {
                Some(expr) => services.evaluator.evaluate(expr, &ctx.bindings())?,
                None => Value::Null,
            };
            tracing::debug!("Raising internal event '{}'", name);
            ctx.raised.push_back(Event::with_data(name.clone(), data));
            Ok(StepValue::Object(json!({ "event": name })))
        }
        NodeKind::Llm => {
            let provider = services.provider.ok_or(ActionError::NoProvider)?;
            let prompt = render_template(required(&ctx, "prompt")?, &ctx.bindings())?;
            let request = LlmRequest {
                node: ctx.node.id.to_string(),
                prompt,
                model: ctx.attr("model").map(str::to_string),
                system: ctx.attr("system").map(str::to_string),
                temperature: ctx.attr("temperature").and_then(|t| t.parse().ok()),
            };
            tracing::debug!(
                "Calling model provider '{}' for node '{}'",
                provider.name(),
                ctx.node.id
            );
            Ok(provider.generate(request).await?)
        }
        NodeKind::Error => {
            let message = render_template(required(&ctx, "message")?, &ctx.bindings())?;
            let code = ctx.attr("code").unwrap_or(ELEMENT_ERROR_CODE);
            Ok(StepValue::error(code, message))
        }
        other => Err(ActionError::Malformed(format!(
            "<{other}> node '{}' is not an executable action",
            ctx.node.id
        ))),
    }
}

fn emit_log(level: Option<&str>, state: &GraphNodeId, message: &str) {
    match level.unwrap_or("info") {
        "trace" => tracing::trace!(state = %state, "{}", message),
        "debug" => tracing::debug!(state = %state, "{}", message),
        "warn" => tracing::warn!(state = %state, "{}", message),
        "error" => tracing::error!(state = %state, "{}", message),
        _ => tracing::info!(state = %state, "{}", message),
    }
}
