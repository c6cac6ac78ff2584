//! Interrupt descriptors and resume decisions for human-in-the-loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schemas::ToolCall;

/// Emitted when a run suspends awaiting a human decision on a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptDescriptor {
    /// Discriminator, always `"tool_approval"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The pending tool call.
    pub call: ToolCall,
    /// Decisions the human may take for this call.
    pub allowed_decisions: Vec<String>,
    pub thread_id: String,
    pub run_id: String,
    /// Idempotency token; a resume must echo it.
    pub resume_token: String,
}

impl InterruptDescriptor {
    pub fn tool_approval(
        call: ToolCall,
        allowed_decisions: Vec<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        step: usize,
    ) -> Self {
        let thread_id = thread_id.into();
        let resume_token = format!("{}:{}:{}", thread_id, step, call.id);
        Self {
            kind: "tool_approval".to_string(),
            call,
            allowed_decisions,
            thread_id,
            run_id: run_id.into(),
            resume_token,
        }
    }
}

/// Human decision applied on resume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ResumeDecision {
    /// Execute the call with its original arguments.
    Approve,
    /// Execute with rewritten arguments.
    Edit { new_args: Value },
    /// Skip execution; the call is answered with a rejected tool message.
    Reject { reason: String },
}

impl ResumeDecision {
    /// Wire name used in `allowed_decisions`.
    pub fn name(&self) -> &'static str {
        match self {
            ResumeDecision::Approve => "approve",
            ResumeDecision::Edit { .. } => "edit",
            ResumeDecision::Reject { .. } => "reject",
        }
    }
}

/// Outcome of driving an agent: completion with the final assistant text,
/// suspension with a resumable descriptor, or cooperative cancellation.
#[derive(Clone, Debug)]
pub enum AgentRunResult {
    Complete(String),
    Interrupted(InterruptDescriptor),
    Cancelled,
}

impl AgentRunResult {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, AgentRunResult::Interrupted(_))
    }

    /// Final text; empty when interrupted or cancelled.
    pub fn output(&self) -> &str {
        match self {
            AgentRunResult::Complete(s) => s,
            AgentRunResult::Interrupted(_) | AgentRunResult::Cancelled => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_carries_resume_token() {
        let call = ToolCall::new("c7", "deploy", json!({"env": "prod"}));
        let d = InterruptDescriptor::tool_approval(
            call,
            vec!["approve".into(), "reject".into()],
            "t1",
            "r1",
            3,
        );
        assert_eq!(d.kind, "tool_approval");
        assert_eq!(d.resume_token, "t1:3:c7");
    }

    #[test]
    fn decisions_serialize_with_tags() {
        let approve = serde_json::to_value(&ResumeDecision::Approve).unwrap();
        assert_eq!(approve["decision"], "approve");
        let edit = serde_json::to_value(&ResumeDecision::Edit {
            new_args: json!({"env": "staging"}),
        })
        .unwrap();
        assert_eq!(edit["decision"], "edit");
        assert_eq!(edit["new_args"]["env"], "staging");
        let parsed: ResumeDecision =
            serde_json::from_value(json!({"decision": "reject", "reason": "no"})).unwrap();
        assert_eq!(parsed.name(), "reject");
    }
}
