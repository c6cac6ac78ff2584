//! Middleware pipeline contract.
//!
//! A middleware participates in the agent step loop through optional hooks;
//! every hook has a no-op default so an implementation only writes the ones
//! it advertises. The executor stores the stack bottom-up
//! (todo list -> filesystem -> subagents -> summarization -> patch ->
//! user middlewares -> human-in-the-loop) and applies this convention:
//!
//! - `before_model` and `before_tool_call` run in stack order, so the
//!   human-in-the-loop layer decides last, after lower layers have assembled
//!   the call;
//! - `after_model` and `after_tool_call` run in reverse stack order.
//!
//! Suspension is an `Err(MiddlewareError::Interrupt(..))` from `before_model`
//! or `before_tool_call`; the executor persists a checkpoint carrying the
//! descriptor and surfaces it to the caller.

pub mod filesystem;
pub mod human_in_loop;
pub mod patch_tool_calls;
pub mod subagents;
pub mod summarization;
pub mod todo_list;

pub use filesystem::FilesystemMiddleware;
pub use human_in_loop::{HumanInTheLoopMiddleware, InterruptConfig};
pub use patch_tool_calls::PatchToolCallsMiddleware;
pub use subagents::{SubAgentMiddleware, SubAgentSpec};
pub use summarization::SummarizationMiddleware;
pub use todo_list::TodoListMiddleware;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::agent::{AgentState, InterruptDescriptor};
use crate::model::ModelRequest;
use crate::schemas::{Message, ToolCall};
use crate::tools::Tool;

/// Per-run information available to middleware hooks.
#[derive(Clone, Debug)]
pub struct MiddlewareContext {
    /// Current step number in the agent loop.
    pub step: usize,
    pub thread_id: String,
    pub run_id: String,
    /// Total tool calls dispatched so far.
    pub tool_call_count: usize,
    /// Set by a middleware to end the step loop after the current step.
    pub stop_requested: bool,
    /// Scratch space middleware can use across hooks (e.g. resume decisions).
    pub custom_data: HashMap<String, Value>,
}

impl MiddlewareContext {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step: 0,
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            tool_call_count: 0,
            stop_requested: false,
            custom_data: HashMap::new(),
        }
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn get_custom_data(&self, key: &str) -> Option<&Value> {
        self.custom_data.get(key)
    }

    pub fn set_custom_data(&mut self, key: impl Into<String>, value: Value) {
        self.custom_data.insert(key.into(), value);
    }
}

/// Errors raised by middleware hooks.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("Middleware execution error: {0}")]
    Execution(String),

    #[error("Middleware aborted execution: {0}")]
    Aborted(String),

    /// Suspend the run for a human decision. The executor persists a
    /// checkpoint carrying the descriptor and returns it to the caller.
    #[error("Interrupt: awaiting human decision for tool call {}", .0.call.id)]
    Interrupt(Box<InterruptDescriptor>),
}

/// Outcome of a `before_model` hook.
#[derive(Debug)]
pub enum BeforeModelOutcome {
    Continue,
    /// Skip the model call this step; the message is appended instead.
    ShortCircuit(Message),
}

/// Outcome of a `before_tool_call` hook.
#[derive(Debug)]
pub enum ToolCallDecision {
    Proceed,
    /// Execute with a rewritten call (same id).
    Replace(ToolCall),
    /// Do not execute; append this tool message as the result.
    Respond(Message),
}

/// A participant in the agent pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name, used in logs and ordering assertions.
    fn name(&self) -> &'static str;

    /// Tools this middleware contributes to the agent.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Runs before each model call, in stack order. May mutate state,
    /// short-circuit the step, or suspend.
    async fn before_model(
        &self,
        state: &mut AgentState,
        ctx: &mut MiddlewareContext,
    ) -> Result<BeforeModelOutcome, MiddlewareError> {
        let _ = (state, ctx);
        Ok(BeforeModelOutcome::Continue)
    }

    /// Mutates the outgoing model request (messages, model choice, tool
    /// subset, caching hints).
    async fn modify_model_request(
        &self,
        request: &mut ModelRequest,
        state: &AgentState,
        ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        let _ = (request, state, ctx);
        Ok(())
    }

    /// Runs after each model response, in reverse stack order.
    async fn after_model(
        &self,
        state: &mut AgentState,
        assistant: &Message,
        ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        let _ = (state, assistant, ctx);
        Ok(())
    }

    /// Runs per tool call before dispatch, in stack order. May rewrite the
    /// call, replace its result, or suspend.
    async fn before_tool_call(
        &self,
        call: &ToolCall,
        ctx: &mut MiddlewareContext,
    ) -> Result<ToolCallDecision, MiddlewareError> {
        let _ = (call, ctx);
        Ok(ToolCallDecision::Proceed)
    }

    /// Runs per tool call after dispatch, in reverse stack order. May rewrite
    /// the tool message before it is appended.
    async fn after_tool_call(
        &self,
        call: &ToolCall,
        result: &mut Message,
        ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        let _ = (call, result, ctx);
        Ok(())
    }
}
