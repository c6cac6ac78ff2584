//! Conversation messages and tool calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role tag of a [Message].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SystemMessage,
    HumanMessage,
    AiMessage,
    ToolMessage,
}

/// A structured request from the assistant to invoke a named tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Stable id; the answering tool message carries the same id.
    pub id: String,
    /// Tool name as surfaced in the tool schema.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One conversation message.
///
/// Assistant messages may carry tool calls; tool messages carry the id of the
/// call they answer. Everything else is plain content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub content: String,
    /// Populated only on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Populated only on tool messages: the id of the answered call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional stable message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    pub fn new_system_message(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::SystemMessage,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            id: None,
        }
    }

    pub fn new_human_message(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::HumanMessage,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            id: None,
        }
    }

    pub fn new_ai_message(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::AiMessage,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            id: None,
        }
    }

    pub fn new_tool_message(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::ToolMessage,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            id: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::SystemMessage
    }

    pub fn is_ai(&self) -> bool {
        self.message_type == MessageType::AiMessage
    }

    pub fn is_tool(&self) -> bool {
        self.message_type == MessageType::ToolMessage
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
