//! Agent assembly: wire defaults, order middlewares, produce a runnable
//! [DeepAgent].

mod config;
mod executor;
mod interrupt;
mod state;

pub use config::{DeepAgentConfig, DEFAULT_SYSTEM_PROMPT};
pub use executor::DeepAgent;
pub use interrupt::{AgentRunResult, InterruptDescriptor, ResumeDecision};
pub use state::AgentState;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::{FileBackend, StateBackend};
use crate::checkpoint::{Checkpointer, InMemorySaver};
use crate::error::AgentError;
use crate::middleware::subagents::ChildDefaults;
use crate::middleware::{
    FilesystemMiddleware, HumanInTheLoopMiddleware, Middleware, PatchToolCallsMiddleware,
    SubAgentMiddleware, SummarizationMiddleware, TodoListMiddleware,
};
use crate::model::{ChatModel, RetryPolicy};
use crate::tools::{InMemoryStore, KeyValueStore, Tool};

/// Build a deep agent.
///
/// Defaults: in-state backend, in-memory store and checkpointer. The
/// middleware stack is ordered bottom-up as
/// `todo_list, filesystem, subagents, summarization, patch_tool_calls,
/// <user middlewares>, human_in_the_loop`; the subagent and
/// human-in-the-loop layers appear only when configured.
pub fn create_deep_agent(
    model: Arc<dyn ChatModel>,
    tools: &[Arc<dyn Tool>],
    config: DeepAgentConfig,
) -> Result<DeepAgent, AgentError> {
    let mut seen = HashSet::new();
    for spec in &config.subagents {
        if !seen.insert(spec.name.clone()) {
            return Err(AgentError::Configuration(format!(
                "duplicate subagent name '{}'",
                spec.name
            )));
        }
    }
    if config.summarization_low_water_tokens >= config.summarization_high_water_tokens {
        return Err(AgentError::Configuration(
            "summarization low-water mark must be below the high-water mark".to_string(),
        ));
    }

    let mut initial_state = AgentState::new();
    if let Some(thread_id) = &config.thread_id {
        initial_state.thread_id = thread_id.clone();
    }
    let thread_id = initial_state.thread_id.clone();
    let state = Arc::new(Mutex::new(initial_state));

    let backend: Arc<dyn FileBackend> = config
        .backend
        .clone()
        .unwrap_or_else(|| Arc::new(StateBackend::new(Arc::clone(&state))));
    let store: Arc<dyn KeyValueStore> = config
        .store
        .clone()
        .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
    let checkpointer: Arc<dyn Checkpointer> = config
        .checkpointer
        .clone()
        .unwrap_or_else(|| Arc::new(InMemorySaver::new()));
    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    // bottom of the stack: planner, filesystem, subagents, summarization
    let mut lower: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(TodoListMiddleware::new()),
        Arc::new(
            FilesystemMiddleware::new(Arc::clone(&backend))
                .with_offload_threshold(config.offload_threshold_bytes)
                .with_offload_preview(config.offload_preview_bytes),
        ),
    ];
    if !config.subagents.is_empty() {
        let defaults = ChildDefaults {
            model: Arc::clone(&model),
            tools: tools.to_vec(),
            store: Arc::clone(&store),
            checkpointer: Arc::clone(&checkpointer),
            config: config.clone(),
        };
        lower.push(Arc::new(SubAgentMiddleware::new(
            config.subagents.clone(),
            defaults,
            config.parallel_subagent_limit,
            config.shared_file_prefixes.clone(),
        )));
    }
    lower.push(Arc::new(
        SummarizationMiddleware::new(Arc::clone(&model))
            .with_high_water_tokens(config.summarization_high_water_tokens)
            .with_low_water_tokens(config.summarization_low_water_tokens),
    ));

    // the full tool surface decides what patch considers a known tool
    let mut tool_list: Vec<Arc<dyn Tool>> = tools.to_vec();
    for mw in &lower {
        tool_list.extend(mw.tools());
    }
    for mw in &config.middleware {
        tool_list.extend(mw.tools());
    }
    let known_tools: Vec<String> = tool_list.iter().map(|t| t.name()).collect();

    let mut middlewares = lower;
    middlewares.push(Arc::new(PatchToolCallsMiddleware::new(known_tools)));
    middlewares.extend(config.middleware.iter().cloned());
    if !config.interrupt_on.is_empty() {
        // outermost: vetoes or rewrites calls after every lower layer
        middlewares.push(Arc::new(
            HumanInTheLoopMiddleware::new().with_interrupt_on_map(config.interrupt_on.clone()),
        ));
    }

    let retry = RetryPolicy {
        max_retries: config.model_retry_limit,
        ..RetryPolicy::default()
    };

    Ok(DeepAgent::new(
        model,
        middlewares,
        tool_list,
        backend,
        store,
        checkpointer,
        state,
        thread_id,
        system_prompt,
        retry,
        config.max_steps,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::middleware::subagents::SubAgentSpec;
    use crate::middleware::InterruptConfig;
    use crate::model::ModelRequest;
    use crate::schemas::Message;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl ChatModel for Idle {
        async fn chat(&self, _request: &ModelRequest) -> Result<Message, ModelError> {
            Ok(Message::new_ai_message("done"))
        }

        fn model_id(&self) -> String {
            "idle".to_string()
        }
    }

    #[test]
    fn default_assembly_surfaces_core_tools() {
        let agent =
            create_deep_agent(Arc::new(Idle), &[], DeepAgentConfig::new()).unwrap();
        let names = agent.tool_names();
        for expected in [
            "write_todos",
            "read_todos",
            "ls",
            "read_file",
            "write_file",
            "edit_file",
            "glob",
            "grep",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        // no subagents configured, no execute capability on the state backend
        assert!(!names.contains(&"task".to_string()));
        assert!(!names.contains(&"execute".to_string()));
    }

    #[test]
    fn task_tool_appears_with_subagents() {
        let config = DeepAgentConfig::new().with_subagent(SubAgentSpec::new(
            "researcher",
            "Researches",
            "You research.",
        ));
        let agent = create_deep_agent(Arc::new(Idle), &[], config).unwrap();
        assert!(agent.tool_names().contains(&"task".to_string()));
    }

    #[test]
    fn duplicate_subagent_names_are_rejected() {
        let config = DeepAgentConfig::new()
            .with_subagent(SubAgentSpec::new("a", "d", "p"))
            .with_subagent(SubAgentSpec::new("a", "d2", "p2"));
        let err = create_deep_agent(Arc::new(Idle), &[], config).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[test]
    fn inverted_watermarks_are_rejected() {
        let config = DeepAgentConfig::new().with_summarization_watermarks(100, 200);
        let err = create_deep_agent(Arc::new(Idle), &[], config).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[test]
    fn hitl_configured_thread_id_is_stable() {
        let config = DeepAgentConfig::new()
            .with_thread_id("thread-7")
            .with_interrupt_on("write_file", InterruptConfig::enabled());
        let agent = create_deep_agent(Arc::new(Idle), &[], config).unwrap();
        assert_eq!(agent.thread_id(), "thread-7");
    }
}
