//! Human-in-the-loop middleware: suspend before sensitive tools.
//!
//! Configured per tool with the decisions a human may take. Before a
//! configured tool executes, the run suspends with a `tool_approval`
//! descriptor; on resume the decision is consumed exactly once. `approve`
//! proceeds, `edit` rewrites the call's arguments, `reject` short-circuits
//! the call to a rejected tool message without executing the tool.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Middleware, MiddlewareContext, MiddlewareError, ToolCallDecision};
use crate::agent::{InterruptDescriptor, ResumeDecision};
use crate::schemas::{Message, ToolCall};

/// Context key under which the executor parks the resume decision.
pub const RESUME_DECISION_KEY: &str = "hitl_resume_decision";

/// Default allowed decisions when a tool is configured without a custom set.
pub const DEFAULT_ALLOWED_DECISIONS: &[&str] = &["approve", "edit", "reject"];

/// Per-tool interrupt configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Subset of {approve, edit, reject}.
    #[serde(default = "default_allowed_decisions")]
    pub allowed_decisions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_allowed_decisions() -> Vec<String> {
    DEFAULT_ALLOWED_DECISIONS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_decisions: default_allowed_decisions(),
        }
    }
}

impl InterruptConfig {
    /// Enabled with the default decision set.
    pub fn enabled() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allowed_decisions: default_allowed_decisions(),
        }
    }

    pub fn with_allowed_decisions(mut self, decisions: Vec<String>) -> Self {
        self.allowed_decisions = decisions;
        self
    }
}

/// Parked resume decision, scoped to one call id.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ParkedDecision {
    call_id: String,
    decision: ResumeDecision,
}

/// Middleware requiring human approval for configured tools.
pub struct HumanInTheLoopMiddleware {
    interrupt_on: HashMap<String, InterruptConfig>,
}

impl HumanInTheLoopMiddleware {
    pub fn new() -> Self {
        Self {
            interrupt_on: HashMap::new(),
        }
    }

    /// Configure one tool; `InterruptConfig::enabled()` for the default set.
    pub fn with_interrupt_on(mut self, tool_name: impl Into<String>, config: InterruptConfig) -> Self {
        self.interrupt_on.insert(tool_name.into(), config);
        self
    }

    pub fn with_interrupt_on_map(mut self, map: HashMap<String, InterruptConfig>) -> Self {
        self.interrupt_on.extend(map);
        self
    }

    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.interrupt_on
            .get(tool_name)
            .map(|c| c.enabled)
            .unwrap_or(false)
    }

    /// Park a decision for `call_id` in the context; the next
    /// `before_tool_call` for that call consumes it.
    pub fn park_decision(ctx: &mut MiddlewareContext, call_id: &str, decision: ResumeDecision) {
        let parked = ParkedDecision {
            call_id: call_id.to_string(),
            decision,
        };
        ctx.set_custom_data(
            RESUME_DECISION_KEY,
            serde_json::to_value(parked).unwrap_or_default(),
        );
    }

    fn take_parked(ctx: &mut MiddlewareContext, call_id: &str) -> Option<ResumeDecision> {
        let parked: ParkedDecision = ctx
            .get_custom_data(RESUME_DECISION_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())?;
        if parked.call_id != call_id {
            return None;
        }
        ctx.custom_data.remove(RESUME_DECISION_KEY);
        Some(parked.decision)
    }
}

impl Default for HumanInTheLoopMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for HumanInTheLoopMiddleware {
    fn name(&self) -> &'static str {
        "human_in_the_loop"
    }

    async fn before_tool_call(
        &self,
        call: &ToolCall,
        ctx: &mut MiddlewareContext,
    ) -> Result<ToolCallDecision, MiddlewareError> {
        let config = match self.interrupt_on.get(&call.name) {
            Some(c) if c.enabled => c,
            _ => return Ok(ToolCallDecision::Proceed),
        };

        if let Some(decision) = Self::take_parked(ctx, &call.id) {
            if !config
                .allowed_decisions
                .iter()
                .any(|d| d == decision.name())
            {
                return Err(MiddlewareError::Aborted(format!(
                    "decision '{}' is not allowed for tool '{}'",
                    decision.name(),
                    call.name
                )));
            }
            return Ok(match decision {
                ResumeDecision::Approve => ToolCallDecision::Proceed,
                ResumeDecision::Edit { new_args } => ToolCallDecision::Replace(ToolCall::new(
                    call.id.clone(),
                    call.name.clone(),
                    new_args,
                )),
                ResumeDecision::Reject { reason } => {
                    let payload = json!({ "status": "rejected", "reason": reason });
                    ToolCallDecision::Respond(Message::new_tool_message(
                        payload.to_string(),
                        call.id.clone(),
                    ))
                }
            });
        }

        let descriptor = InterruptDescriptor::tool_approval(
            call.clone(),
            config.allowed_decisions.clone(),
            ctx.thread_id.clone(),
            ctx.run_id.clone(),
            ctx.step,
        );
        Err(MiddlewareError::Interrupt(Box::new(descriptor)))
    }
}
