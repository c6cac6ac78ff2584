//! Mutable agent state threaded through a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schemas::{Message, Todo};

/// The single mutable record a run carries: conversation messages, the
/// planning scratchpad, and (when the in-state backend is active) the
/// virtual filesystem. Messages are append-only within a turn; only
/// summarization rewrites them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    pub todos: Vec<Todo>,
    /// path -> content; populated only by the in-state backend.
    pub files: HashMap<String, String>,
    /// Opaque stable id of this run.
    pub run_id: String,
    /// Checkpointing identity; child agents derive their own from this.
    pub thread_id: String,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            todos: Vec::new(),
            files: HashMap::new(),
            run_id: Uuid::new_v4().to_string(),
            thread_id: Uuid::new_v4().to_string(),
        }
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// The last assistant message, if any.
    pub fn last_ai_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_ai())
    }

    /// Ids of assistant tool calls in the message tail that have no matching
    /// tool response yet.
    pub fn dangling_tool_call_ids(&self) -> Vec<String> {
        let answered: std::collections::HashSet<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let mut out = Vec::new();
        for msg in &self.messages {
            for call in &msg.tool_calls {
                if !answered.contains(call.id.as_str()) {
                    out.push(call.id.clone());
                }
            }
        }
        out
    }
}
