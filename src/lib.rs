//! # deepagents
//!
//! A harness for long-horizon, tool-using LLM agents. It drives an agent
//! through many model/tool turns while giving it a planning scratchpad, a
//! virtual filesystem over pluggable backends, isolated subagent dispatch,
//! and cooperative middleware that can rewrite messages, intercept tool
//! calls, and suspend execution for human approval.
//!
//! ## Overview
//!
//! - **Pipeline** — an ordered middleware stack wraps each model call and
//!   each tool call ([middleware])
//! - **Backends** — one file contract over agent state, disk, a key-value
//!   store, and a prefix-routing composite ([backend])
//! - **Subagents** — a `task` tool that runs isolated children whose only
//!   surfaced output is a summary string ([middleware::subagents])
//! - **Human-in-the-loop** — suspend on sensitive tools, resume with
//!   approve/edit/reject, repair the partial tool-call graph
//!   ([middleware::human_in_loop], [middleware::patch_tool_calls])
//! - **Persistence** — checkpoints at step boundaries ([checkpoint])
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use deepagents::agent::{create_deep_agent, DeepAgentConfig};
//!
//! # async fn run(model: Arc<dyn deepagents::model::ChatModel>) -> Result<(), Box<dyn std::error::Error>> {
//! let agent = create_deep_agent(model, &[], DeepAgentConfig::new())?;
//! let result = agent.invoke("Plan and write /notes/summary.md").await?;
//! println!("{}", result.output());
//! # Ok(()) }
//! ```
//!
//! The LLM provider, concrete persistence drivers, and shell sandboxes are
//! external collaborators behind the [model::ChatModel],
//! [checkpoint::Checkpointer], [tools::KeyValueStore], and
//! [backend::Sandbox] contracts.

/// Agent assembly, state, executor, and interrupts.
pub mod agent;
/// Filesystem backends and the path/edit primitives they share.
pub mod backend;
/// Checkpoint persistence at step boundaries.
pub mod checkpoint;
/// Structured error taxonomy.
pub mod error;
/// Middleware pipeline contract and the core middlewares.
pub mod middleware;
/// Chat model contract and retry policy.
pub mod model;
/// Messages, tool calls, and todos.
pub mod schemas;
/// Tool contract, runtime handle, and key-value store.
pub mod tools;

pub use agent::{create_deep_agent, AgentRunResult, AgentState, DeepAgent, DeepAgentConfig};
pub use backend::{
    CompositeBackend, FileBackend, FilesystemBackend, StateBackend, StoreBackend,
};
pub use error::AgentError;
pub use model::{ChatModel, ModelRequest};
pub use schemas::{Message, MessageType, Todo, TodoStatus, ToolCall};
