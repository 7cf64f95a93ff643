//! Model provider seam for `llm` nodes

use crate::error::MaskedError;
use crate::step::{FinishReason, StepValue, StreamChunk};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A rendered model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Graph node issuing the call
    pub node: String,
    /// Rendered prompt
    pub prompt: String,
    /// Model name, possibly inherited from an ancestor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Provider failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// The provider cannot serve requests
    #[error("Model provider unavailable: {0}")]
    Unavailable(String),
    /// The request was rejected or failed
    #[error("Model request failed: {0}")]
    Request(String),
    /// Too many requests
    #[error("Rate limit reached, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait
        retry_after: Duration,
    },
}

impl MaskedError for ProviderError {
    fn public_message(&self) -> String {
        match self {
            Self::RateLimited { .. } => "The model is busy, try again later".to_string(),
            _ => "The model request failed".to_string(),
        }
    }

    fn code(&self) -> &str {
        match self {
            Self::Unavailable(_) => "provider_unavailable",
            Self::Request(_) => "provider_error",
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Source of model output
///
/// Implementations usually return [`StepValue::Stream`]; the engine settles
/// the stream and forwards its chunks to streaming callers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Generate output for a request
    async fn generate(&self, request: LlmRequest) -> Result<StepValue, ProviderError>;
}

/// Offline provider that streams the prompt back word by word
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    delay: Option<Duration>,
}

impl EchoProvider {
    /// Echo without delays
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait `delay` before each chunk
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: LlmRequest) -> Result<StepValue, ProviderError> {
        let mut chunks: Vec<StreamChunk> = request
            .prompt
            .split_inclusive(' ')
            .map(|word| StreamChunk::TextDelta {
                delta: word.to_string(),
            })
            .collect();
        chunks.push(StreamChunk::Finish {
            reason: FinishReason::Stop,
        });

        let delay = self.delay;
        let stream = futures::stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        Ok(StepValue::Stream(stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_streams_prompt() {
        let provider = EchoProvider::new();
        let request = LlmRequest {
            node: "0.0.0".into(),
            prompt: "hello there world".into(),
            model: None,
            system: None,
            temperature: None,
        };
        let StepValue::Stream(stream) = provider.generate(request).await.unwrap() else {
            panic!("expected a stream");
        };
        let chunks: Vec<StreamChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(
            chunks[0],
            StreamChunk::TextDelta {
                delta: "hello ".into()
            }
        );
        assert_eq!(
            chunks[3],
            StreamChunk::Finish {
                reason: FinishReason::Stop
            }
        );
    }

    #[test]
    fn test_provider_errors_are_masked() {
        let error = ProviderError::Request("401 from upstream".into());
        assert_eq!(error.public_message(), "The model request failed");
        assert_eq!(error.code(), "provider_error");
    }
}
