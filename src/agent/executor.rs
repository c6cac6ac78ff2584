//! The agent step loop.
//!
//! One step: checkpoint, `before_model` hooks, build and send the model
//! request, `after_model` hooks, then per tool call `before_tool_call`,
//! dispatch, `after_tool_call`, append, checkpoint. The loop exits when an
//! assistant message carries no tool calls, a middleware requests stop, the
//! step cap is hit, or the run suspends or is cancelled.
//!
//! Hook ordering (also documented on [crate::middleware]): `before_model`
//! and `before_tool_call` run in stack order, `after_model` and
//! `after_tool_call` in reverse stack order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::interrupt::{AgentRunResult, InterruptDescriptor, ResumeDecision};
use super::state::AgentState;
use crate::backend::FileBackend;
use crate::checkpoint::{Checkpoint, CheckpointStatus, Checkpointer};
use crate::error::{tool_error_payload, AgentError, ErrorKind};
use crate::middleware::human_in_loop::HumanInTheLoopMiddleware;
use crate::middleware::{
    BeforeModelOutcome, Middleware, MiddlewareContext, MiddlewareError, ToolCallDecision,
};
use crate::model::{chat_with_retry, ChatModel, ModelRequest, RetryPolicy, ToolSchema};
use crate::schemas::{Message, ToolCall};
use crate::tools::{KeyValueStore, Tool, ToolRuntime};

const MAX_STEPS_NOTICE: &str = "Stopping: maximum number of steps reached.";
const CANCELLED_REASON: &str = "run was cancelled";

enum ModelPhase {
    /// Assistant message appended; it carries tool calls to execute.
    ToolCallsPending,
    /// Assistant message appended with no tool calls (or stop requested).
    Complete(String),
}

enum ToolPhase {
    Done,
    Suspended(Box<InterruptDescriptor>),
    Cancelled,
}

/// A compiled deep agent: model, middleware stack, tools, backend, store,
/// checkpointer, and its own state. Drive it with [DeepAgent::invoke] and
/// [DeepAgent::resume]; one run at a time per agent.
pub struct DeepAgent {
    model: Arc<dyn ChatModel>,
    middlewares: Vec<Arc<dyn Middleware>>,
    tool_list: Vec<Arc<dyn Tool>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    backend: Arc<dyn FileBackend>,
    store: Arc<dyn KeyValueStore>,
    checkpointer: Arc<dyn Checkpointer>,
    state: Arc<Mutex<AgentState>>,
    thread_id: String,
    system_prompt: String,
    retry: RetryPolicy,
    max_steps: usize,
    cancel_grace: Duration,
}

impl std::fmt::Debug for DeepAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepAgent")
            .field("thread_id", &self.thread_id)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl DeepAgent {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model: Arc<dyn ChatModel>,
        middlewares: Vec<Arc<dyn Middleware>>,
        tool_list: Vec<Arc<dyn Tool>>,
        backend: Arc<dyn FileBackend>,
        store: Arc<dyn KeyValueStore>,
        checkpointer: Arc<dyn Checkpointer>,
        state: Arc<Mutex<AgentState>>,
        thread_id: String,
        system_prompt: String,
        retry: RetryPolicy,
        max_steps: usize,
    ) -> Self {
        let tools = tool_list
            .iter()
            .map(|t| (t.name(), Arc::clone(t)))
            .collect();
        Self {
            model,
            middlewares,
            tool_list,
            tools,
            backend,
            store,
            checkpointer,
            state,
            thread_id,
            system_prompt,
            retry,
            max_steps,
            cancel_grace: Duration::from_secs(2),
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Names of the tools visible to the model.
    pub fn tool_names(&self) -> Vec<String> {
        self.tool_list.iter().map(|t| t.name()).collect()
    }

    /// A clone of the current state.
    pub async fn snapshot_state(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    /// Run one user turn to completion, suspension, or cancellation.
    pub async fn invoke(&self, input: &str) -> Result<AgentRunResult, AgentError> {
        self.invoke_with_cancellation(input, CancellationToken::new())
            .await
    }

    pub async fn invoke_with_cancellation(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult, AgentError> {
        {
            let mut state = self.state.lock().await;
            if state.messages.is_empty() {
                let prompt = self.system_prompt.clone();
                state.messages.push(Message::new_system_message(prompt));
            }
            state.messages.push(Message::new_human_message(input));
        }
        let mut ctx = self.new_context().await;
        self.run_loop(&mut ctx, cancel, false).await
    }

    /// Resume a suspended run with a human decision for the pending call.
    pub async fn resume(&self, decision: ResumeDecision) -> Result<AgentRunResult, AgentError> {
        self.resume_with_cancellation(decision, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancellation(
        &self,
        decision: ResumeDecision,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult, AgentError> {
        let checkpoint = self
            .checkpointer
            .get(&self.thread_id, None)
            .await?
            .ok_or_else(|| AgentError::NothingToResume(self.thread_id.clone()))?;
        let pending = checkpoint
            .pending_interrupt
            .clone()
            .ok_or_else(|| AgentError::NothingToResume(self.thread_id.clone()))?;
        self.resume_inner(checkpoint, &pending.resume_token, decision, cancel)
            .await
    }

    /// Resume with an explicit token; a token that does not match the pending
    /// interrupt is rejected, making resumption idempotent.
    pub async fn resume_with_token(
        &self,
        resume_token: &str,
        decision: ResumeDecision,
    ) -> Result<AgentRunResult, AgentError> {
        let checkpoint = self
            .checkpointer
            .get(&self.thread_id, None)
            .await?
            .ok_or_else(|| AgentError::NothingToResume(self.thread_id.clone()))?;
        self.resume_inner(checkpoint, resume_token, decision, CancellationToken::new())
            .await
    }

    async fn resume_inner(
        &self,
        checkpoint: Checkpoint,
        resume_token: &str,
        decision: ResumeDecision,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult, AgentError> {
        let pending = checkpoint
            .pending_interrupt
            .clone()
            .ok_or_else(|| AgentError::NothingToResume(self.thread_id.clone()))?;
        if pending.resume_token != resume_token {
            return Err(AgentError::StaleResumeToken(resume_token.to_string()));
        }
        {
            let mut state = self.state.lock().await;
            *state = checkpoint.state.clone();
        }
        let mut ctx = self.new_context().await;
        ctx.step = checkpoint.step;
        HumanInTheLoopMiddleware::park_decision(&mut ctx, &pending.call.id, decision);
        self.run_loop(&mut ctx, cancel, true).await
    }

    async fn new_context(&self) -> MiddlewareContext {
        let state = self.state.lock().await;
        MiddlewareContext::new(state.thread_id.clone(), state.run_id.clone())
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tool_list.iter().map(|t| t.schema()).collect()
    }

    async fn run_loop(
        &self,
        ctx: &mut MiddlewareContext,
        cancel: CancellationToken,
        mut resume_tools_first: bool,
    ) -> Result<AgentRunResult, AgentError> {
        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(ctx).await;
            }

            if !resume_tools_first {
                ctx.step += 1;
                if ctx.step > self.max_steps {
                    return self.finish_max_steps(ctx).await;
                }
                self.save_checkpoint(ctx, CheckpointStatus::Running, None)
                    .await?;

                match self.model_phase(ctx).await {
                    Ok(ModelPhase::ToolCallsPending) => {}
                    Ok(ModelPhase::Complete(text)) => {
                        return self.finish_complete(ctx, text).await
                    }
                    Err(PhaseError::Interrupted(descriptor)) => {
                        return self.finish_interrupted(ctx, *descriptor).await;
                    }
                    Err(PhaseError::Fatal(e)) => {
                        self.save_checkpoint(ctx, CheckpointStatus::Failed, None)
                            .await?;
                        return Err(e);
                    }
                }
            }
            resume_tools_first = false;

            let pending = self.pending_tool_calls().await;
            if !pending.is_empty() {
                match self.tool_phase(&pending, ctx, &cancel).await? {
                    ToolPhase::Done => {}
                    ToolPhase::Suspended(descriptor) => {
                        return self.finish_interrupted(ctx, *descriptor).await;
                    }
                    ToolPhase::Cancelled => return self.finish_cancelled(ctx).await,
                }
            }
            self.save_checkpoint(ctx, CheckpointStatus::Running, None)
                .await?;

            if ctx.stop_requested {
                let text = self
                    .state
                    .lock()
                    .await
                    .last_ai_message()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                return self.finish_complete(ctx, text).await;
            }
        }
    }

    async fn model_phase(&self, ctx: &mut MiddlewareContext) -> Result<ModelPhase, PhaseError> {
        // before_model, stack order
        let mut short_circuit = None;
        {
            let mut state = self.state.lock().await;
            for mw in &self.middlewares {
                match mw.before_model(&mut state, ctx).await {
                    Ok(BeforeModelOutcome::Continue) => {}
                    Ok(BeforeModelOutcome::ShortCircuit(msg)) => {
                        short_circuit = Some(msg);
                        break;
                    }
                    Err(MiddlewareError::Interrupt(d)) => return Err(PhaseError::Interrupted(d)),
                    Err(e) => return Err(PhaseError::Fatal(AgentError::Middleware(e.to_string()))),
                }
            }
        }
        if let Some(msg) = short_circuit {
            let has_calls = msg.has_tool_calls();
            let text = msg.content.clone();
            self.state.lock().await.messages.push(msg);
            return Ok(if has_calls {
                ModelPhase::ToolCallsPending
            } else {
                ModelPhase::Complete(text)
            });
        }

        // build the request and let middleware reshape it
        let state_snapshot = self.state.lock().await.clone();
        let mut request = ModelRequest::new(
            state_snapshot.messages.clone(),
            self.tool_schemas(),
            self.model.model_id(),
        );
        for mw in &self.middlewares {
            mw.modify_model_request(&mut request, &state_snapshot, ctx)
                .await
                .map_err(|e| PhaseError::Fatal(AgentError::Middleware(e.to_string())))?;
        }

        let mut assistant = chat_with_retry(self.model.as_ref(), &request, self.retry)
            .await
            .map_err(|e| PhaseError::Fatal(e.into()))?;
        for call in assistant.tool_calls.iter_mut() {
            if call.id.is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4());
            }
        }

        let has_calls = assistant.has_tool_calls();
        let text = assistant.content.clone();
        {
            let mut state = self.state.lock().await;
            state.messages.push(assistant.clone());
            // after_model, reverse stack order
            for mw in self.middlewares.iter().rev() {
                mw.after_model(&mut state, &assistant, ctx)
                    .await
                    .map_err(|e| PhaseError::Fatal(AgentError::Middleware(e.to_string())))?;
            }
        }

        Ok(if has_calls && !ctx.stop_requested {
            ModelPhase::ToolCallsPending
        } else {
            ModelPhase::Complete(text)
        })
    }

    /// Unanswered calls of the last assistant message, in call order.
    async fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let state = self.state.lock().await;
        let last_ai_index = match state.messages.iter().rposition(|m| m.is_ai()) {
            Some(i) => i,
            None => return Vec::new(),
        };
        let answered: std::collections::HashSet<&str> = state.messages[last_ai_index..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        state.messages[last_ai_index]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect()
    }

    async fn tool_phase(
        &self,
        calls: &[ToolCall],
        ctx: &mut MiddlewareContext,
        cancel: &CancellationToken,
    ) -> Result<ToolPhase, AgentError> {
        let all_parallel_safe = calls.len() > 1
            && calls.iter().all(|c| {
                self.tools
                    .get(&c.name)
                    .map(|t| t.parallel_safe())
                    .unwrap_or(false)
            });
        if all_parallel_safe {
            self.tool_phase_parallel(calls, ctx, cancel).await
        } else {
            self.tool_phase_sequential(calls, ctx, cancel).await
        }
    }

    /// Hooks and dispatch interleaved per call, in call order.
    async fn tool_phase_sequential(
        &self,
        calls: &[ToolCall],
        ctx: &mut MiddlewareContext,
        cancel: &CancellationToken,
    ) -> Result<ToolPhase, AgentError> {
        for (idx, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                self.append_cancelled(&calls[idx..]).await;
                return Ok(ToolPhase::Cancelled);
            }
            let plan = match self.plan_tool_call(call, ctx).await {
                Ok(plan) => plan,
                Err(PhaseError::Interrupted(d)) => return Ok(ToolPhase::Suspended(d)),
                Err(PhaseError::Fatal(e)) => return Err(e),
            };
            let (effective, mut result, was_cancelled) = match plan {
                ToolPlan::Respond(effective, msg) => (effective, msg, false),
                ToolPlan::Execute(effective) => {
                    let (msg, was_cancelled) = self.dispatch_tool(&effective, cancel).await;
                    (effective, msg, was_cancelled)
                }
            };
            match self.finish_tool_call(&effective, &mut result, ctx).await {
                Ok(()) => {}
                Err(PhaseError::Interrupted(d)) => {
                    self.state.lock().await.messages.push(result);
                    return Ok(ToolPhase::Suspended(d));
                }
                Err(PhaseError::Fatal(e)) => return Err(e),
            }
            self.state.lock().await.messages.push(result);
            ctx.tool_call_count += 1;
            if was_cancelled {
                self.append_cancelled(&calls[idx + 1..]).await;
                return Ok(ToolPhase::Cancelled);
            }
        }
        Ok(ToolPhase::Done)
    }

    /// All calls planned first, then executed concurrently; results are
    /// stitched back in call order regardless of completion order.
    async fn tool_phase_parallel(
        &self,
        calls: &[ToolCall],
        ctx: &mut MiddlewareContext,
        cancel: &CancellationToken,
    ) -> Result<ToolPhase, AgentError> {
        let mut plans = Vec::with_capacity(calls.len());
        for call in calls {
            match self.plan_tool_call(call, ctx).await {
                Ok(plan) => plans.push(plan),
                Err(PhaseError::Interrupted(d)) => return Ok(ToolPhase::Suspended(d)),
                Err(PhaseError::Fatal(e)) => return Err(e),
            }
        }

        let futures = plans.into_iter().map(|plan| async move {
            match plan {
                ToolPlan::Respond(effective, msg) => (effective, msg, false),
                ToolPlan::Execute(effective) => {
                    let (msg, was_cancelled) = self.dispatch_tool(&effective, cancel).await;
                    (effective, msg, was_cancelled)
                }
            }
        });
        let outcomes = join_all(futures).await;

        let mut any_cancelled = false;
        for (effective, mut result, was_cancelled) in outcomes {
            any_cancelled |= was_cancelled;
            match self.finish_tool_call(&effective, &mut result, ctx).await {
                Ok(()) => {}
                Err(PhaseError::Interrupted(d)) => {
                    self.state.lock().await.messages.push(result);
                    return Ok(ToolPhase::Suspended(d));
                }
                Err(PhaseError::Fatal(e)) => return Err(e),
            }
            self.state.lock().await.messages.push(result);
            ctx.tool_call_count += 1;
        }
        if any_cancelled || cancel.is_cancelled() {
            return Ok(ToolPhase::Cancelled);
        }
        Ok(ToolPhase::Done)
    }

    /// Run `before_tool_call` hooks in stack order for one call.
    async fn plan_tool_call(
        &self,
        call: &ToolCall,
        ctx: &mut MiddlewareContext,
    ) -> Result<ToolPlan, PhaseError> {
        let mut effective = call.clone();
        for mw in &self.middlewares {
            match mw.before_tool_call(&effective, ctx).await {
                Ok(ToolCallDecision::Proceed) => {}
                Ok(ToolCallDecision::Replace(rewritten)) => effective = rewritten,
                Ok(ToolCallDecision::Respond(msg)) => {
                    return Ok(ToolPlan::Respond(effective, msg))
                }
                Err(MiddlewareError::Interrupt(d)) => return Err(PhaseError::Interrupted(d)),
                Err(e) => return Err(PhaseError::Fatal(AgentError::Middleware(e.to_string()))),
            }
        }
        Ok(ToolPlan::Execute(effective))
    }

    /// Run `after_tool_call` hooks in reverse stack order for one result.
    async fn finish_tool_call(
        &self,
        call: &ToolCall,
        result: &mut Message,
        ctx: &mut MiddlewareContext,
    ) -> Result<(), PhaseError> {
        for mw in self.middlewares.iter().rev() {
            match mw.after_tool_call(call, result, ctx).await {
                Ok(()) => {}
                Err(MiddlewareError::Interrupt(d)) => return Err(PhaseError::Interrupted(d)),
                Err(e) => return Err(PhaseError::Fatal(AgentError::Middleware(e.to_string()))),
            }
        }
        Ok(())
    }

    /// Dispatch a call to its tool. Returns the tool message and whether the
    /// run was cancelled while the call was in flight.
    async fn dispatch_tool(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> (Message, bool) {
        let tool = match self.tools.get(&call.name) {
            Some(t) => Arc::clone(t),
            None => {
                let payload = tool_error_payload(
                    "ToolError.UnknownTool",
                    format!("unknown tool '{}'", call.name),
                );
                return (
                    Message::new_tool_message(payload.to_string(), call.id.clone()),
                    false,
                );
            }
        };
        let runtime = ToolRuntime::new(
            Arc::clone(&self.state),
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            call.id.clone(),
        )
        .with_cancellation(cancel.child_token());

        let fut = tool.run(call.arguments.clone(), &runtime);
        tokio::pin!(fut);
        let outcome = tokio::select! {
            res = &mut fut => Some(res),
            _ = cancel.cancelled() => {
                // grace window for the in-flight call
                match tokio::time::timeout(self.cancel_grace, &mut fut).await {
                    Ok(res) => Some(res),
                    Err(_) => None,
                }
            }
        };
        match outcome {
            Some(Ok(text)) => (
                Message::new_tool_message(text, call.id.clone()),
                cancel.is_cancelled(),
            ),
            Some(Err(err)) => {
                log::info!("tool '{}' returned an error: {}", call.name, err);
                let payload = tool_error_payload(&err.error_kind(), &err);
                (
                    Message::new_tool_message(payload.to_string(), call.id.clone()),
                    cancel.is_cancelled(),
                )
            }
            None => {
                let payload = json!({ "status": "cancelled", "reason": CANCELLED_REASON });
                (
                    Message::new_tool_message(payload.to_string(), call.id.clone()),
                    true,
                )
            }
        }
    }

    /// Append cancellation responses for calls that never ran.
    async fn append_cancelled(&self, calls: &[ToolCall]) {
        let mut state = self.state.lock().await;
        for call in calls {
            let payload = json!({ "status": "cancelled", "reason": CANCELLED_REASON });
            state
                .messages
                .push(Message::new_tool_message(payload.to_string(), call.id.clone()));
        }
    }

    async fn save_checkpoint(
        &self,
        ctx: &MiddlewareContext,
        status: CheckpointStatus,
        pending: Option<InterruptDescriptor>,
    ) -> Result<(), AgentError> {
        let state = self.state.lock().await.clone();
        let mut checkpoint =
            Checkpoint::new(self.thread_id.clone(), ctx.step, state).with_status(status);
        checkpoint.pending_interrupt = pending;
        self.checkpointer.put(&checkpoint).await?;
        Ok(())
    }

    async fn finish_complete(
        &self,
        ctx: &MiddlewareContext,
        text: String,
    ) -> Result<AgentRunResult, AgentError> {
        self.save_checkpoint(ctx, CheckpointStatus::Complete, None)
            .await?;
        Ok(AgentRunResult::Complete(text))
    }

    async fn finish_interrupted(
        &self,
        ctx: &MiddlewareContext,
        descriptor: InterruptDescriptor,
    ) -> Result<AgentRunResult, AgentError> {
        self.save_checkpoint(ctx, CheckpointStatus::Interrupted, Some(descriptor.clone()))
            .await?;
        Ok(AgentRunResult::Interrupted(descriptor))
    }

    async fn finish_cancelled(
        &self,
        ctx: &MiddlewareContext,
    ) -> Result<AgentRunResult, AgentError> {
        // make the history valid before the terminal save
        let dangling = self.state.lock().await.dangling_tool_call_ids();
        if !dangling.is_empty() {
            let mut state = self.state.lock().await;
            for id in dangling {
                let payload = json!({ "status": "cancelled", "reason": CANCELLED_REASON });
                state
                    .messages
                    .push(Message::new_tool_message(payload.to_string(), id));
            }
        }
        self.save_checkpoint(ctx, CheckpointStatus::Cancelled, None)
            .await?;
        Ok(AgentRunResult::Cancelled)
    }

    async fn finish_max_steps(
        &self,
        ctx: &MiddlewareContext,
    ) -> Result<AgentRunResult, AgentError> {
        self.state
            .lock()
            .await
            .messages
            .push(Message::new_ai_message(MAX_STEPS_NOTICE));
        self.finish_complete(ctx, MAX_STEPS_NOTICE.to_string()).await
    }
}

enum ToolPlan {
    Execute(ToolCall),
    Respond(ToolCall, Message),
}

enum PhaseError {
    Interrupted(Box<InterruptDescriptor>),
    Fatal(AgentError),
}
