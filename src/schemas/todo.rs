//! Todo items for the planning scratchpad.

use serde::{Deserialize, Serialize};

/// Status of a [Todo]. Transitions are expected to move forward
/// (pending -> in_progress -> completed), though `write_todos` accepts a
/// wholesale replacement of the list.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl Default for TodoStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TodoStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One item in the agent's planning scratchpad.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    /// Unique within one state.
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

impl Todo {
    pub fn new(id: impl Into<String>, content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status,
        }
    }
}
