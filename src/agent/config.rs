//! Deep agent configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::FileBackend;
use crate::checkpoint::Checkpointer;
use crate::middleware::subagents::SubAgentSpec;
use crate::middleware::{InterruptConfig, Middleware};
use crate::tools::KeyValueStore;

/// Default system prompt when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a deep agent. Plan with write_todos, work \
through files with the filesystem tools, and delegate isolated subtasks with the task tool \
when subagents are configured.";

/// Tunables and pluggable collaborators for [crate::agent::create_deep_agent].
///
/// Every field has a default: in-state backend, in-memory store and
/// checkpointer, no subagents, no interrupts.
#[derive(Clone)]
pub struct DeepAgentConfig {
    /// Base system prompt; middleware appends its own usage notes.
    pub system_prompt: Option<String>,
    /// Tool results larger than this many bytes are offloaded to
    /// `/tool_outputs/<call_id>`.
    pub offload_threshold_bytes: usize,
    /// Bytes of preview kept in the offload stub.
    pub offload_preview_bytes: usize,
    /// Summarization trigger threshold (estimated tokens).
    pub summarization_high_water_tokens: usize,
    /// Summarization target after a pass (estimated tokens).
    pub summarization_low_water_tokens: usize,
    /// Bound on concurrently running sibling subagents.
    pub parallel_subagent_limit: usize,
    /// Retries for transient model failures.
    pub model_retry_limit: usize,
    /// Hard cap on loop iterations.
    pub max_steps: usize,
    /// Allow subagents to dispatch their own `task` calls.
    pub allow_nested_tasks: bool,
    /// Child files under these prefixes propagate back to the parent.
    pub shared_file_prefixes: Vec<String>,
    /// Tools requiring human approval, with their allowed decisions.
    pub interrupt_on: HashMap<String, InterruptConfig>,
    /// Subagents reachable through the `task` tool.
    pub subagents: Vec<SubAgentSpec>,
    /// Filesystem backend; defaults to the in-state backend.
    pub backend: Option<Arc<dyn FileBackend>>,
    /// Persistent store; defaults to an in-memory store.
    pub store: Option<Arc<dyn KeyValueStore>>,
    /// Checkpointer; defaults to an in-memory saver.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    /// Extra user middlewares, run between patch and human-in-the-loop.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Fixed thread id (e.g. to resume an earlier conversation).
    pub thread_id: Option<String>,
}

impl Default for DeepAgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            offload_threshold_bytes: 20_000,
            offload_preview_bytes: 512,
            summarization_high_water_tokens: 170_000,
            summarization_low_water_tokens: 120_000,
            parallel_subagent_limit: 4,
            model_retry_limit: 3,
            max_steps: 100,
            allow_nested_tasks: false,
            shared_file_prefixes: Vec::new(),
            interrupt_on: HashMap::new(),
            subagents: Vec::new(),
            backend: None,
            store: None,
            checkpointer: None,
            middleware: Vec::new(),
            thread_id: None,
        }
    }
}

impl DeepAgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_offload_threshold_bytes(mut self, bytes: usize) -> Self {
        self.offload_threshold_bytes = bytes;
        self
    }

    pub fn with_summarization_watermarks(mut self, high: usize, low: usize) -> Self {
        self.summarization_high_water_tokens = high;
        self.summarization_low_water_tokens = low;
        self
    }

    pub fn with_parallel_subagent_limit(mut self, limit: usize) -> Self {
        self.parallel_subagent_limit = limit.max(1);
        self
    }

    pub fn with_model_retry_limit(mut self, limit: usize) -> Self {
        self.model_retry_limit = limit;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_allow_nested_tasks(mut self, allow: bool) -> Self {
        self.allow_nested_tasks = allow;
        self
    }

    /// Child files under this prefix are written back to the parent backend
    /// after a subagent completes.
    pub fn with_shared_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shared_file_prefixes.push(prefix.into());
        self
    }

    /// Require human approval before this tool runs.
    pub fn with_interrupt_on(
        mut self,
        tool_name: impl Into<String>,
        config: InterruptConfig,
    ) -> Self {
        self.interrupt_on.insert(tool_name.into(), config);
        self
    }

    pub fn with_subagent(mut self, spec: SubAgentSpec) -> Self {
        self.subagents.push(spec);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn FileBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

impl std::fmt::Debug for DeepAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepAgentConfig")
            .field("system_prompt", &self.system_prompt)
            .field("offload_threshold_bytes", &self.offload_threshold_bytes)
            .field(
                "summarization_high_water_tokens",
                &self.summarization_high_water_tokens,
            )
            .field(
                "summarization_low_water_tokens",
                &self.summarization_low_water_tokens,
            )
            .field("parallel_subagent_limit", &self.parallel_subagent_limit)
            .field("model_retry_limit", &self.model_retry_limit)
            .field("max_steps", &self.max_steps)
            .field("allow_nested_tasks", &self.allow_nested_tasks)
            .field("shared_file_prefixes", &self.shared_file_prefixes)
            .field("interrupt_on", &self.interrupt_on.len())
            .field("subagents", &self.subagents.len())
            .field("backend", &self.backend.as_ref().map(|_| "..."))
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("checkpointer", &self.checkpointer.as_ref().map(|_| "..."))
            .field("middleware", &self.middleware.len())
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
