//! Chat model contract.
//!
//! The harness never talks to a provider directly: each step builds a
//! [ModelRequest] (full message history, visible tool schemas, model id,
//! caching hints) and hands it to a [ChatModel]. Transient failures are
//! retried by the executor with exponential backoff.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::schemas::Message;

/// Tool schema surfaced to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// A single-shot model request for one agent step.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Full (possibly summarized) message history.
    pub messages: Vec<Message>,
    /// Schemas of the tools visible this step.
    pub tools: Vec<ToolSchema>,
    /// Model id chosen for this step; middleware may rewrite it.
    pub model_id: String,
    /// Provider-specific caching hints; an external caching middleware fills
    /// these via `modify_model_request`.
    pub cache_hints: HashMap<String, Value>,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolSchema>, model_id: impl Into<String>) -> Self {
        Self {
            messages,
            tools,
            model_id: model_id.into(),
            cache_hints: HashMap::new(),
        }
    }
}

/// Narrow contract over the LLM provider client.
///
/// The response must be an assistant message, possibly carrying tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: &ModelRequest) -> Result<Message, ModelError>;

    /// Default model id used when building requests.
    fn model_id(&self) -> String;
}

/// Retry policy for model calls: exponential backoff over retryable errors.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: std::time::Duration::from_millis(250),
        }
    }
}

/// Invoke the model, retrying [retryable](ModelError::is_retryable) failures
/// with exponential backoff. Non-retryable errors and exhaustion propagate.
pub async fn chat_with_retry(
    model: &dyn ChatModel,
    request: &ModelRequest,
    policy: RetryPolicy,
) -> Result<Message, ModelError> {
    let mut attempt = 0usize;
    loop {
        match model.chat(request).await {
            Ok(message) => {
                if message.message_type != crate::schemas::MessageType::AiMessage {
                    return Err(ModelError::InvalidResponse(
                        "model response must be an assistant message".to_string(),
                    ));
                }
                return Ok(message);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt as u32);
                log::warn!(
                    "model call failed (attempt {}/{}): {}; retrying in {:?}",
                    attempt + 1,
                    policy.max_retries,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
