//! Summarization middleware: keep the conversation under a token budget.
//!
//! When the estimated token count of the history crosses the high-water mark,
//! the oldest contiguous prefix of non-system messages is summarized by the
//! model and replaced with a single synthetic assistant message. Assistant
//! tool-call messages travel with their tool responses as one atomic unit,
//! so a call is never split from its response. The trim budget includes a
//! reserve for the summary message itself, and the summary is truncated to
//! that reserve, so the post-pass total stays under the low-water mark.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BeforeModelOutcome, Middleware, MiddlewareContext, MiddlewareError};
use crate::agent::AgentState;
use crate::model::{ChatModel, ModelRequest};
use crate::schemas::Message;

const SUMMARIZATION_PROMPT: &str = "Summarize the following conversation history. Preserve key \
facts, decisions, file paths, and unfinished work so the conversation can continue seamlessly.";

const CHARS_PER_TOKEN: usize = 4;

/// Middleware that compresses old history when it grows past a budget.
pub struct SummarizationMiddleware {
    model: Arc<dyn ChatModel>,
    high_water_tokens: usize,
    low_water_tokens: usize,
    summary_reserve_tokens: usize,
}

impl SummarizationMiddleware {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            high_water_tokens: 170_000,
            low_water_tokens: 120_000,
            summary_reserve_tokens: 2_000,
        }
    }

    pub fn with_high_water_tokens(mut self, tokens: usize) -> Self {
        self.high_water_tokens = tokens;
        self
    }

    pub fn with_low_water_tokens(mut self, tokens: usize) -> Self {
        self.low_water_tokens = tokens;
        self
    }

    /// Token budget reserved for the synthetic summary message; the summary
    /// is truncated to fit it.
    pub fn with_summary_reserve_tokens(mut self, tokens: usize) -> Self {
        self.summary_reserve_tokens = tokens.max(1);
        self
    }

    fn estimate_message(message: &Message) -> usize {
        let mut chars = message.content.len();
        for call in &message.tool_calls {
            chars += call.name.len() + call.arguments.to_string().len();
        }
        chars / CHARS_PER_TOKEN + 1
    }

    /// Estimated token count over a slice of messages.
    pub fn estimate(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }

    /// Split `messages` (system prefix excluded) into atomic units: an
    /// assistant message with tool calls plus its contiguous tool responses,
    /// or a single message.
    fn units(messages: &[Message]) -> Vec<&[Message]> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < messages.len() {
            let mut end = i + 1;
            if messages[i].has_tool_calls() {
                while end < messages.len() && messages[end].is_tool() {
                    end += 1;
                }
            }
            out.push(&messages[i..end]);
            i = end;
        }
        out
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, MiddlewareError> {
        let transcript: Vec<String> = messages
            .iter()
            .map(|m| {
                let role = match m.message_type {
                    crate::schemas::MessageType::SystemMessage => "system",
                    crate::schemas::MessageType::HumanMessage => "user",
                    crate::schemas::MessageType::AiMessage => "assistant",
                    crate::schemas::MessageType::ToolMessage => "tool",
                };
                let calls = if m.has_tool_calls() {
                    let names: Vec<&str> =
                        m.tool_calls.iter().map(|c| c.name.as_str()).collect();
                    format!(" [called: {}]", names.join(", "))
                } else {
                    String::new()
                };
                format!("{}:{} {}", role, calls, m.content)
            })
            .collect();
        let request = ModelRequest::new(
            vec![
                Message::new_system_message(SUMMARIZATION_PROMPT),
                Message::new_human_message(transcript.join("\n")),
            ],
            vec![],
            self.model.model_id(),
        );
        let summary = self
            .model
            .chat(&request)
            .await
            .map_err(|e| MiddlewareError::Execution(format!("summarization failed: {}", e)))?;
        Ok(summary.content)
    }
}

#[async_trait]
impl Middleware for SummarizationMiddleware {
    fn name(&self) -> &'static str {
        "summarization"
    }

    async fn before_model(
        &self,
        state: &mut AgentState,
        _ctx: &mut MiddlewareContext,
    ) -> Result<BeforeModelOutcome, MiddlewareError> {
        let total = Self::estimate(&state.messages);
        if total <= self.high_water_tokens {
            return Ok(BeforeModelOutcome::Continue);
        }

        let system_count = state
            .messages
            .iter()
            .take_while(|m| m.is_system())
            .count();
        let (system, rest) = state.messages.split_at(system_count);
        let units = Self::units(rest);
        if units.len() < 2 {
            // nothing summarizable without dropping the live tail
            return Ok(BeforeModelOutcome::Continue);
        }

        // Take whole units from the front until the remainder, plus the
        // reserve for the summary message itself, fits under the low-water
        // mark. The most recent unit always stays in place.
        let reserve = self.summary_reserve_tokens.max(1);
        let mut removed_tokens = 0usize;
        let mut removed_messages = 0usize;
        for unit in &units[..units.len() - 1] {
            if total - removed_tokens + reserve <= self.low_water_tokens {
                break;
            }
            removed_tokens += Self::estimate(unit);
            removed_messages += unit.len();
        }
        if removed_messages == 0 {
            return Ok(BeforeModelOutcome::Continue);
        }

        let to_summarize = &rest[..removed_messages];
        log::info!(
            "summarizing {} messages (~{} tokens) to bring history under {} tokens",
            removed_messages,
            removed_tokens,
            self.low_water_tokens
        );
        let summary = self.summarize(to_summarize).await?;

        let mut summary_message = Message::new_ai_message(format!(
            "Summary of earlier conversation:\n{}",
            summary
        ));
        // keep the summary inside the reserve budgeted during trimming
        let max_bytes = (reserve - 1) * CHARS_PER_TOKEN;
        if summary_message.content.len() > max_bytes {
            summary_message.content =
                truncate_to_boundary(&summary_message.content, max_bytes).to_string();
        }

        let mut messages: Vec<Message> = system.to_vec();
        messages.push(summary_message);
        messages.extend_from_slice(&rest[removed_messages..]);
        state.messages = messages;
        Ok(BeforeModelOutcome::Continue)
    }
}

/// Cut `content` to at most `max_bytes`, backing up to a char boundary.
fn truncate_to_boundary(content: &str, max_bytes: usize) -> &str {
    if content.len() <= max_bytes {
        return content;
    }
    let mut end = max_bytes;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}
