//! Subagent middleware: the `task` tool and its dispatcher.
//!
//! A subagent is an isolated child agent whose only surfaced output is the
//! text of its final assistant message. Children start from a fresh state
//! (system prompt + task description) and never inherit parent messages or
//! todos; files written by a child propagate back only under the configured
//! shared prefixes. Sibling `task` calls in one assistant message run in
//! parallel, bounded by a semaphore, and are stitched back in call order by
//! the executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};

use super::{Middleware, MiddlewareContext, MiddlewareError};
use crate::agent::{create_deep_agent, AgentRunResult, DeepAgent, DeepAgentConfig};
use crate::backend::paths::is_under;
use crate::checkpoint::Checkpointer;
use crate::error::{SubAgentError, ToolError};
use crate::model::ChatModel;
use crate::schemas::{Message, MessageType};
use crate::tools::{required_str, KeyValueStore, Tool, ToolRuntime};

/// Declaration of one subagent.
///
/// Either `runnable` carries a pre-compiled agent, or the spec is compiled
/// lazily on first dispatch from `prompt`/`tools`/`model` plus the enclosing
/// harness defaults (minus the `task` tool itself, unless nesting is
/// enabled).
#[derive(Clone)]
pub struct SubAgentSpec {
    pub name: String,
    /// Shown to the model so it can pick the right subagent.
    pub description: String,
    /// Child system prompt.
    pub prompt: String,
    /// Child tools; `None` inherits the harness's user tools.
    pub tools: Option<Vec<Arc<dyn Tool>>>,
    /// Child model; `None` inherits the harness model.
    pub model: Option<Arc<dyn ChatModel>>,
    /// Pre-compiled agent; takes precedence over lazy compilation.
    pub runnable: Option<Arc<DeepAgent>>,
}

impl SubAgentSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt: prompt.into(),
            tools: None,
            model: None,
            runnable: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_runnable(mut self, agent: Arc<DeepAgent>) -> Self {
        self.runnable = Some(agent);
        self
    }
}

impl std::fmt::Debug for SubAgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Harness defaults a lazily-declared child is compiled with.
#[derive(Clone)]
pub struct ChildDefaults {
    pub model: Arc<dyn ChatModel>,
    /// The harness's user tools (middleware tools are re-derived per child).
    pub tools: Vec<Arc<dyn Tool>>,
    pub store: Arc<dyn KeyValueStore>,
    pub checkpointer: Arc<dyn Checkpointer>,
    /// Numeric tunables copied onto children.
    pub config: DeepAgentConfig,
}

/// Shared dispatcher behind the `task` tool.
struct TaskDispatcher {
    registry: HashMap<String, SubAgentSpec>,
    defaults: ChildDefaults,
    /// Compiled children, keyed by name.
    compiled: Mutex<HashMap<String, Arc<CompiledChild>>>,
    /// Bounds concurrently running siblings.
    semaphore: Arc<Semaphore>,
    shared_file_prefixes: Vec<String>,
}

/// Resolved pieces needed to run one child; each dispatch builds a fresh
/// agent from these so children stay isolated.
struct CompiledChild {
    prompt: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    runnable: Option<Arc<DeepAgent>>,
}

impl TaskDispatcher {
    async fn compiled_child(&self, name: &str) -> Result<Arc<CompiledChild>, SubAgentError> {
        let mut compiled = self.compiled.lock().await;
        if let Some(child) = compiled.get(name) {
            return Ok(Arc::clone(child));
        }
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| SubAgentError::UnknownSubAgent(name.to_string()))?;
        let child = Arc::new(CompiledChild {
            prompt: spec.prompt.clone(),
            model: spec
                .model
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.defaults.model)),
            tools: spec
                .tools
                .clone()
                .unwrap_or_else(|| self.defaults.tools.clone()),
            runnable: spec.runnable.clone(),
        });
        compiled.insert(name.to_string(), Arc::clone(&child));
        Ok(child)
    }

    /// Run the named child to completion and return its final assistant text
    /// together with its file map.
    async fn dispatch(
        &self,
        name: &str,
        description: &str,
        child_thread_id: &str,
    ) -> Result<(String, HashMap<String, String>), SubAgentError> {
        let child = self.compiled_child(name).await?;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| SubAgentError::ChildFailed(e.to_string()))?;

        let agent = match &child.runnable {
            Some(agent) => Arc::clone(agent),
            None => {
                let mut config = self
                    .defaults
                    .config
                    .clone()
                    .with_system_prompt(child.prompt.clone())
                    .with_thread_id(child_thread_id.to_string());
                // children run unattended and, unless nesting is enabled,
                // without a task tool of their own
                config.interrupt_on.clear();
                if !config.allow_nested_tasks {
                    config.subagents.clear();
                }
                config.backend = None;
                config.store = Some(Arc::clone(&self.defaults.store));
                config.checkpointer = Some(Arc::clone(&self.defaults.checkpointer));
                let agent = create_deep_agent(Arc::clone(&child.model), &child.tools, config)
                    .map_err(|e| SubAgentError::CompilationFailed(e.to_string()))?;
                Arc::new(agent)
            }
        };

        log::debug!("dispatching subagent '{}' on thread {}", name, child_thread_id);
        let result = agent
            .invoke(description)
            .await
            .map_err(|e| SubAgentError::ChildFailed(e.to_string()))?;
        let output = match result {
            AgentRunResult::Complete(text) => text,
            AgentRunResult::Interrupted(_) => {
                return Err(SubAgentError::ChildFailed(
                    "subagent suspended awaiting approval; children run unattended".to_string(),
                ))
            }
            AgentRunResult::Cancelled => {
                return Err(SubAgentError::ChildFailed("subagent was cancelled".to_string()))
            }
        };
        let files = agent.snapshot_state().await.files;
        Ok((output, files))
    }
}

/// Middleware contributing the `task` tool.
pub struct SubAgentMiddleware {
    dispatcher: Arc<TaskDispatcher>,
    descriptions: Vec<(String, String)>,
}

impl SubAgentMiddleware {
    pub fn new(
        subagents: Vec<SubAgentSpec>,
        defaults: ChildDefaults,
        parallel_limit: usize,
        shared_file_prefixes: Vec<String>,
    ) -> Self {
        let descriptions = subagents
            .iter()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        let registry = subagents.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self {
            dispatcher: Arc::new(TaskDispatcher {
                registry,
                defaults,
                compiled: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(parallel_limit.max(1))),
                shared_file_prefixes,
            }),
            descriptions,
        }
    }
}

#[async_trait]
impl Middleware for SubAgentMiddleware {
    fn name(&self) -> &'static str {
        "subagents"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(TaskTool {
            dispatcher: Arc::clone(&self.dispatcher),
            descriptions: self.descriptions.clone(),
        })]
    }
}

/// The `task` tool: delegate a subtask to a named subagent.
pub struct TaskTool {
    dispatcher: Arc<TaskDispatcher>,
    descriptions: Vec<(String, String)>,
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> String {
        "task".to_string()
    }

    fn description(&self) -> String {
        let catalog: Vec<String> = self
            .descriptions
            .iter()
            .map(|(name, desc)| format!("- {}: {}", name, desc))
            .collect();
        format!(
            "Delegate a subtask to an isolated subagent; only its final summary comes back.\n\
             Available subagents:\n{}",
            catalog.join("\n")
        )
    }

    fn parameters(&self) -> Value {
        let names: Vec<Value> = self
            .descriptions
            .iter()
            .map(|(name, _)| json!(name))
            .collect();
        json!({
            "type": "object",
            "properties": {
                "subagent_name": {
                    "type": "string",
                    "description": "Name of the subagent to dispatch",
                    "enum": names
                },
                "description": {
                    "type": "string",
                    "description": "Complete task description for the subagent"
                }
            },
            "required": ["subagent_name", "description"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let name = required_str(&args, "subagent_name")?;
        let description = required_str(&args, "description")?;
        let child_thread_id = {
            let state = runtime.state().await;
            format!("{}:{}", state.thread_id, runtime.tool_call_id)
        };
        let (output, files) = self
            .dispatcher
            .dispatch(&name, &description, &child_thread_id)
            .await?;

        // propagate shared files through the parent's backend
        let mut shared: Vec<(&String, &String)> = files
            .iter()
            .filter(|(path, _)| {
                self.dispatcher
                    .shared_file_prefixes
                    .iter()
                    .any(|prefix| is_under(prefix, path))
            })
            .collect();
        shared.sort_by(|a, b| a.0.cmp(b.0));
        for (path, content) in shared {
            runtime.backend().write(path, content).await?;
        }
        Ok(output)
    }

    /// Sibling task calls in one assistant message may run concurrently.
    fn parallel_safe(&self) -> bool {
        true
    }
}

/// Extract the concatenated text of the final assistant message of a child
/// transcript.
pub fn final_assistant_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.message_type == MessageType::AiMessage)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_assistant_text_picks_last_ai() {
        let messages = vec![
            Message::new_system_message("sys"),
            Message::new_ai_message("first"),
            Message::new_ai_message("last"),
            Message::new_tool_message("obs", "c1"),
        ];
        assert_eq!(final_assistant_text(&messages), "last");
        assert_eq!(final_assistant_text(&[]), "");
    }

    #[test]
    fn spec_builder_defaults() {
        let spec = SubAgentSpec::new("researcher", "Research things", "You research.");
        assert!(spec.tools.is_none());
        assert!(spec.model.is_none());
        assert!(spec.runnable.is_none());
        assert_eq!(format!("{:?}", spec), "SubAgentSpec { name: \"researcher\", description: \"Research things\" }");
    }
}
