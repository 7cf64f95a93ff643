//! CEL expression hosting
//!
//! Guards, `assign`/`script` expressions and `data` declarations are CEL
//! programs evaluated against JSON bindings. Non-negative JSON integers are
//! bound as signed CEL integers so `count == 10` compares as expected.

use super::cache::CelProgramCache;
use cel_interpreter::objects::{Key, Map as CelMap};
use cel_interpreter::{Context, Value as CelValue};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Expression failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The source did not parse
    #[error("Failed to compile expression '{expression}': {message}")]
    Compile {
        /// Source text
        expression: String,
        /// Parser message
        message: String,
    },
    /// Evaluation failed, for example on an unknown variable
    #[error("Failed to evaluate expression '{expression}': {message}")]
    Execute {
        /// Source text
        expression: String,
        /// Interpreter message
        message: String,
    },
    /// A guard produced something that is not a truth value
    #[error("Expression '{expression}' returned non-boolean result: {value}")]
    NotBoolean {
        /// Source text
        expression: String,
        /// Rendered result
        value: String,
    },
}

/// Evaluates CEL expressions through a shared program cache
#[derive(Clone)]
pub struct ExpressionEvaluator {
    cache: CelProgramCache,
}

impl ExpressionEvaluator {
    /// Evaluator whose cache holds `capacity` programs
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: CelProgramCache::new(capacity),
        }
    }

    /// Program cache
    pub fn cache(&self) -> &CelProgramCache {
        &self.cache
    }

    /// Evaluate `expression` with every binding in scope
    pub fn evaluate(&self, expression: &str, bindings: &Map<String, Value>) -> Result<Value, ExpressionError> {
        let program = self
            .cache
            .get_or_compile(expression)
            .map_err(|message| ExpressionError::Compile {
                expression: expression.to_string(),
                message,
            })?;

        let mut context = Context::default();
        for (name, value) in bindings {
            context.add_variable_from_value(name.as_str(), json_to_cel(value));
        }

        let result = program
            .execute(&context)
            .map_err(|e| ExpressionError::Execute {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        tracing::trace!("Expression '{}' evaluated to {:?}", expression, result);
        Ok(cel_to_json(&result))
    }

    /// Evaluate a guard
    ///
    /// Booleans are used as is; numbers are true when non-zero, strings when
    /// non-empty and null is false. Anything else is an error.
    pub fn evaluate_bool(&self, expression: &str, bindings: &Map<String, Value>) -> Result<bool, ExpressionError> {
        let value = self.evaluate(expression, bindings)?;
        let truth = match &value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            other => {
                return Err(ExpressionError::NotBoolean {
                    expression: expression.to_string(),
                    value: other.to_string(),
                })
            }
        };
        tracing::debug!("Guard '{}' evaluated to {}", expression, truth);
        Ok(truth)
    }
}

/// Convert JSON into a CEL value
pub fn json_to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => CelValue::Int(i),
            (None, Some(u)) => CelValue::UInt(u),
            (None, None) => CelValue::Float(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(json_to_cel).collect())),
        Value::Object(entries) => {
            let map: HashMap<Key, CelValue> = entries
                .iter()
                .map(|(k, v)| (Key::String(Arc::new(k.clone())), json_to_cel(v)))
                .collect();
            CelValue::Map(CelMap { map: Arc::new(map) })
        }
    }
}

/// Convert a CEL value into JSON
pub fn cel_to_json(value: &CelValue) -> Value {
    match value {
        CelValue::Null => Value::Null,
        CelValue::Bool(b) => Value::Bool(*b),
        CelValue::Int(i) => Value::Number((*i).into()),
        CelValue::UInt(u) => Value::Number((*u).into()),
        CelValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        CelValue::String(s) => Value::String(s.as_str().to_string()),
        CelValue::List(items) => Value::Array(items.iter().map(cel_to_json).collect()),
        CelValue::Map(map) => {
            let mut entries: Vec<(String, Value)> = map
                .map
                .iter()
                .map(|(k, v)| (key_to_string(k), cel_to_json(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn key_to_string(key: &Key) -> String {
    match key {
        Key::String(s) => s.as_str().to_string(),
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
    }
}
