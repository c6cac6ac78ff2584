//! Tool-call repair: heal the message history before each model call.
//!
//! Resuming after an interrupt (or a crash between a tool call and its
//! response) leaves assistant tool calls without matching tool messages.
//! That is a recoverable state, not a bug: this middleware synthesizes
//! cancellation responses for every dangling call and drops assistant
//! messages whose only content was calls to unknown tools, so the next model
//! request always sees matched pairs.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use super::{BeforeModelOutcome, Middleware, MiddlewareContext, MiddlewareError};
use crate::agent::AgentState;
use crate::schemas::Message;

const CANCELLED_REASON: &str = "tool call was cancelled or interrupted before execution";

/// Middleware that repairs dangling and invalid tool calls.
pub struct PatchToolCallsMiddleware {
    known_tools: HashSet<String>,
}

impl PatchToolCallsMiddleware {
    pub fn new(known_tools: impl IntoIterator<Item = String>) -> Self {
        Self {
            known_tools: known_tools.into_iter().collect(),
        }
    }

    /// Drop assistant messages that carry nothing but unknown-tool calls.
    fn strip_invalid_assistants(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .filter(|msg| {
                if !msg.is_ai() || msg.tool_calls.is_empty() || !msg.content.trim().is_empty() {
                    return true;
                }
                let all_unknown = msg
                    .tool_calls
                    .iter()
                    .all(|c| !self.known_tools.contains(&c.name));
                if all_unknown {
                    log::warn!(
                        "dropping assistant message whose only content was unknown tool calls: {:?}",
                        msg.tool_calls.iter().map(|c| &c.name).collect::<Vec<_>>()
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Insert synthetic cancelled responses directly after each assistant
    /// message's answered calls, preserving pair adjacency.
    fn repair_dangling(messages: Vec<Message>) -> Vec<Message> {
        let answered: HashSet<String> = messages
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        let mut out = Vec::with_capacity(messages.len());
        let mut i = 0;
        while i < messages.len() {
            let msg = messages[i].clone();
            let calls = msg.tool_calls.clone();
            out.push(msg);
            i += 1;
            if calls.is_empty() {
                continue;
            }
            // carry over the contiguous run of existing tool responses
            while i < messages.len() && messages[i].is_tool() {
                out.push(messages[i].clone());
                i += 1;
            }
            for call in &calls {
                if !answered.contains(&call.id) {
                    let payload = json!({ "status": "cancelled", "reason": CANCELLED_REASON });
                    out.push(Message::new_tool_message(payload.to_string(), call.id.clone()));
                }
            }
        }
        out
    }
}

#[async_trait]
impl Middleware for PatchToolCallsMiddleware {
    fn name(&self) -> &'static str {
        "patch_tool_calls"
    }

    async fn before_model(
        &self,
        state: &mut AgentState,
        _ctx: &mut MiddlewareContext,
    ) -> Result<BeforeModelOutcome, MiddlewareError> {
        let messages = std::mem::take(&mut state.messages);
        let messages = self.strip_invalid_assistants(messages);
        state.messages = Self::repair_dangling(messages);
        Ok(BeforeModelOutcome::Continue)
    }
}
