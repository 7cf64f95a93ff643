//! Uniform result of a node execution
//!
//! Every node yields exactly one [`StepValue`]. Model output may arrive as a
//! live stream of [`StreamChunk`]s, which the engine settles into a plain value
//! before the next node starts.

use crate::error::{MaskedError, SERVER_ERROR_CODE};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;

/// Error code of a step that was cancelled
pub const CANCELLED_CODE: &str = "cancelled";

/// Error code of a step that ran out of time
pub const TIMEOUT_CODE: &str = "timeout";

/// A tool invocation requested by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as JSON
    #[serde(default)]
    pub arguments: Value,
}

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural end of output or of a completed run
    Stop,
    /// The model asked for tool calls
    ToolCalls,
    /// Output hit a length limit
    Length,
    /// Generation or the run failed
    Error,
    /// The run was cancelled
    Cancelled,
    /// The run is waiting for input or events
    Paused,
}

/// Incremental piece of a streamed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    /// Output text fragment
    TextDelta {
        /// Fragment
        delta: String,
    },
    /// Model reasoning fragment
    Reasoning {
        /// Fragment
        delta: String,
    },
    /// A complete tool call
    ToolCall {
        /// The call
        call: ToolCall,
    },
    /// A node settled during a streamed run
    Step {
        /// Graph node id
        node: String,
        /// Settled value as JSON
        value: Value,
    },
    /// End of stream
    Finish {
        /// Why it ended
        reason: FinishReason,
    },
}

/// Live stream of chunks
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Result of executing one graph node
pub enum StepValue {
    /// Plain text
    Text(String),
    /// Structured JSON value
    Object(Value),
    /// Tool invocations
    ToolCalls(Vec<ToolCall>),
    /// Failure with a machine-readable code
    Error {
        /// Error code such as `timeout` or `server_error`
        code: String,
        /// Message safe to show to users
        message: String,
    },
    /// Output still being produced
    Stream(ChunkStream),
}

impl StepValue {
    /// Error step
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Empty value used before any node has run
    pub fn empty() -> Self {
        Self::Object(Value::Null)
    }

    /// True for the error variant
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// True for the stream variant
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Copy a settled value; streams cannot be copied
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Text(text) => Some(Self::Text(text.clone())),
            Self::Object(value) => Some(Self::Object(value.clone())),
            Self::ToolCalls(calls) => Some(Self::ToolCalls(calls.clone())),
            Self::Error { code, message } => Some(Self::error(code.clone(), message.clone())),
            Self::Stream(_) => None,
        }
    }

    /// Tagged JSON form used for serialization and stream step chunks
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => json!({ "type": "text", "text": text }),
            Self::Object(value) => json!({ "type": "object", "value": value }),
            Self::ToolCalls(calls) => json!({ "type": "tool-calls", "calls": calls }),
            Self::Error { code, message } => {
                json!({ "type": "error", "code": code, "message": message })
            }
            Self::Stream(_) => json!({ "type": "stream" }),
        }
    }

    /// Untagged payload bound as `result` in expressions
    pub fn payload(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Object(value) => value.clone(),
            Self::ToolCalls(calls) => serde_json::to_value(calls).unwrap_or(Value::Null),
            Self::Error { code, message } => json!({ "code": code, "message": message }),
            Self::Stream(_) => Value::Null,
        }
    }
}

impl fmt::Debug for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Object(value) => f.debug_tuple("Object").field(value).finish(),
            Self::ToolCalls(calls) => f.debug_tuple("ToolCalls").field(calls).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl PartialEq for StepValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stream(_), _) | (_, Self::Stream(_)) => false,
            _ => self.to_json() == other.to_json(),
        }
    }
}

impl Serialize for StepValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Raw output of a node behavior before normalization
pub enum RawOutput {
    /// Already a step value
    Step(StepValue),
    /// Any JSON value, possibly an error descriptor
    Json(Value),
}

impl From<StepValue> for RawOutput {
    fn from(value: StepValue) -> Self {
        Self::Step(value)
    }
}

impl From<Value> for RawOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for RawOutput {
    fn from(value: String) -> Self {
        Self::Step(StepValue::Text(value))
    }
}

/// Normalize raw output into a step value
///
/// Step values pass through. An error descriptor `{"type": "error", "error": .., "code": ..}`
/// becomes an error step with `server_error` as the default code. Strings become
/// text and anything else becomes an object.
pub fn to_step_value(raw: impl Into<RawOutput>) -> StepValue {
    match raw.into() {
        RawOutput::Step(step) => step,
        RawOutput::Json(Value::String(text)) => StepValue::Text(text),
        RawOutput::Json(value) if is_error_descriptor(&value) => {
            let code = value
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(SERVER_ERROR_CODE);
            let message = match value.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
                Some(other) => other.to_string(),
                None => "Unknown error".to_string(),
            };
            StepValue::error(code, message)
        }
        RawOutput::Json(value) => StepValue::Object(value),
    }
}

fn is_error_descriptor(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("error")
}

/// Run a node behavior and normalize its outcome
///
/// Non-fatal failures become error steps carrying the public message; the
/// internal message goes to the log. Fatal failures are handed back so the
/// engine can abort the run.
pub async fn wrap_execution<C, K, F, Fut, T, E>(
    behavior: F,
    context: C,
    children: K,
) -> Result<StepValue, E>
where
    F: FnOnce(C, K) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Into<RawOutput>,
    E: MaskedError,
{
    match behavior(context, children).await {
        Ok(raw) => Ok(to_step_value(raw)),
        Err(error) if error.is_fatal() => Err(error),
        Err(error) => {
            tracing::warn!("Node execution failed: {}", error.internal_message());
            Ok(StepValue::error(error.code(), error.public_message()))
        }
    }
}
