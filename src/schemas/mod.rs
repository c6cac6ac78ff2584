//! Data model shared across the harness: messages, tool calls, todos.

pub mod messages;
pub mod todo;

pub use messages::{Message, MessageType, ToolCall};
pub use todo::{Todo, TodoStatus};
