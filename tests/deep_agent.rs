//! End-to-end harness tests driven by a scripted chat model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use deepagents::agent::{
    create_deep_agent, AgentRunResult, AgentState, DeepAgentConfig, ResumeDecision,
};
use deepagents::backend::{CompositeBackend, StateBackend, StoreBackend};
use deepagents::checkpoint::{CheckpointStatus, Checkpointer, InMemorySaver};
use deepagents::error::{ModelError, ToolError};
use deepagents::middleware::subagents::SubAgentSpec;
use deepagents::middleware::{
    InterruptConfig, Middleware, MiddlewareContext, MiddlewareError,
};
use deepagents::model::{ChatModel, ModelRequest};
use deepagents::schemas::{Message, ToolCall, TodoStatus};
use deepagents::tools::{InMemoryStore, KeyValueStore, Tool, ToolRuntime};

/// Chat model that replays a fixed script and records every request.
struct ScriptedModel {
    script: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(script: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn recorded_requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: &ModelRequest) -> Result<Message, ModelError> {
        self.requests.lock().await.push(request.clone());
        self.script
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ModelError::InvalidResponse("script exhausted".to_string()))
    }

    fn model_id(&self) -> String {
        "scripted".to_string()
    }
}

fn ai_call(id: &str, name: &str, args: Value) -> Message {
    Message::new_ai_message("").with_tool_calls(vec![ToolCall::new(id, name, args)])
}

fn tool_message_for<'a>(state: &'a AgentState, call_id: &str) -> &'a Message {
    state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some(call_id))
        .unwrap_or_else(|| panic!("no tool message for {}", call_id))
}

// write_todos then read_todos returns exactly the accepted list.
#[tokio::test]
async fn todo_round_trip() {
    let model = ScriptedModel::new(vec![
        ai_call(
            "c1",
            "write_todos",
            json!({"todos": [
                {"content": "a", "status": "pending"},
                {"content": "b", "status": "pending"},
                {"content": "c", "status": "pending"},
            ]}),
        ),
        ai_call("c2", "read_todos", json!({})),
        Message::new_ai_message("planned"),
    ]);
    let agent = create_deep_agent(model, &[], DeepAgentConfig::new()).unwrap();
    let result = agent.invoke("plan three steps").await.unwrap();
    assert_eq!(result.output(), "planned");

    let state = agent.snapshot_state().await;
    assert_eq!(state.todos.len(), 3);
    assert_eq!(state.todos[0].content, "a");
    assert!(state.todos.iter().all(|t| t.status == TodoStatus::Pending));

    // read_todos surfaced exactly the accepted list
    let listed = tool_message_for(&state, "c2");
    for content in ["\"a\"", "\"b\"", "\"c\""] {
        assert!(listed.content.contains(content));
    }
}

// edit_file rejects a non-unique old_string unless replace_all is set.
#[tokio::test]
async fn edit_uniqueness_errors_then_replaces_all() {
    let model = ScriptedModel::new(vec![
        ai_call("c1", "write_file", json!({"path": "/x.txt", "content": "foo foo"})),
        ai_call(
            "c2",
            "edit_file",
            json!({"path": "/x.txt", "old_string": "foo", "new_string": "bar"}),
        ),
        ai_call(
            "c3",
            "edit_file",
            json!({"path": "/x.txt", "old_string": "foo", "new_string": "bar", "replace_all": true}),
        ),
        Message::new_ai_message("edited"),
    ]);
    let agent = create_deep_agent(model, &[], DeepAgentConfig::new()).unwrap();
    agent.invoke("fix x.txt").await.unwrap();

    let state = agent.snapshot_state().await;
    let failed: Value = serde_json::from_str(&tool_message_for(&state, "c2").content).unwrap();
    assert_eq!(failed["error_kind"], "EditError.OldNotUnique");
    assert_eq!(tool_message_for(&state, "c3").content, "2");
    assert_eq!(state.files.get("/x.txt").map(String::as_str), Some("bar bar"));
}

// Composite routing: store-routed paths persist across runs, scratch does not.
#[tokio::test]
async fn composite_routing_persists_memories_across_runs() {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());

    let scratch = Arc::new(Mutex::new(AgentState::new()));
    let backend = CompositeBackend::new(Arc::new(StateBackend::new(scratch)))
        .with_route("/memories", Arc::new(StoreBackend::new(Arc::clone(&store), "fs")))
        .unwrap();
    let model = ScriptedModel::new(vec![
        ai_call("c1", "write_file", json!({"path": "/memories/u.txt", "content": "x"})),
        ai_call("c2", "write_file", json!({"path": "/tmp.txt", "content": "y"})),
        Message::new_ai_message("saved"),
    ]);
    let agent = create_deep_agent(
        model,
        &[],
        DeepAgentConfig::new().with_backend(Arc::new(backend)),
    )
    .unwrap();
    agent.invoke("remember u, scratch tmp").await.unwrap();

    // second run: fresh scratch state, same store
    let scratch = Arc::new(Mutex::new(AgentState::new()));
    let backend = CompositeBackend::new(Arc::new(StateBackend::new(scratch)))
        .with_route("/memories", Arc::new(StoreBackend::new(store, "fs")))
        .unwrap();
    let model = ScriptedModel::new(vec![
        ai_call("c1", "read_file", json!({"path": "/memories/u.txt"})),
        ai_call("c2", "read_file", json!({"path": "/tmp.txt"})),
        Message::new_ai_message("checked"),
    ]);
    let agent = create_deep_agent(
        model,
        &[],
        DeepAgentConfig::new().with_backend(Arc::new(backend)),
    )
    .unwrap();
    agent.invoke("recall").await.unwrap();

    let state = agent.snapshot_state().await;
    assert!(tool_message_for(&state, "c1").content.contains('x'));
    let missing: Value = serde_json::from_str(&tool_message_for(&state, "c2").content).unwrap();
    assert_eq!(missing["error_kind"], "PathError.NotFound");
}

/// Records every set of arguments it was executed with.
struct DeployTool {
    executed: Arc<StdMutex<Vec<Value>>>,
}

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> String {
        "deploy".to_string()
    }

    fn description(&self) -> String {
        "Deploy to an environment.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "env": { "type": "string" } },
            "required": ["env"]
        })
    }

    async fn run(&self, args: Value, _runtime: &ToolRuntime) -> Result<String, ToolError> {
        let env = args["env"].as_str().unwrap_or("?").to_string();
        self.executed.lock().unwrap().push(args);
        Ok(format!("deployed to {}", env))
    }
}

// Approval flow: suspend, resume with rewritten args, tool runs once.
#[tokio::test]
async fn hitl_edit_rewrites_arguments_and_proceeds() {
    let executed = Arc::new(StdMutex::new(Vec::new()));
    let deploy: Arc<dyn Tool> = Arc::new(DeployTool {
        executed: Arc::clone(&executed),
    });
    let model = ScriptedModel::new(vec![
        ai_call("c1", "deploy", json!({"env": "prod"})),
        Message::new_ai_message("release done"),
    ]);
    let agent = create_deep_agent(
        model,
        &[deploy],
        DeepAgentConfig::new().with_interrupt_on("deploy", InterruptConfig::enabled()),
    )
    .unwrap();

    let result = agent.invoke("ship it").await.unwrap();
    let descriptor = match result {
        AgentRunResult::Interrupted(d) => d,
        other => panic!("expected interrupt, got {:?}", other),
    };
    assert_eq!(descriptor.kind, "tool_approval");
    assert_eq!(descriptor.call.name, "deploy");
    assert_eq!(descriptor.call.arguments["env"], "prod");
    assert!(executed.lock().unwrap().is_empty());

    let result = agent
        .resume(ResumeDecision::Edit {
            new_args: json!({"env": "staging"}),
        })
        .await
        .unwrap();
    assert_eq!(result.output(), "release done");

    let ran = executed.lock().unwrap().clone();
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0]["env"], "staging");

    let state = agent.snapshot_state().await;
    assert_eq!(tool_message_for(&state, "c1").content, "deployed to staging");
}

// After a rejection the model sees a rejected tool message and the tool
// observed no side effects.
#[tokio::test]
async fn hitl_reject_short_circuits_without_side_effects() {
    let executed = Arc::new(StdMutex::new(Vec::new()));
    let deploy: Arc<dyn Tool> = Arc::new(DeployTool {
        executed: Arc::clone(&executed),
    });
    let model = ScriptedModel::new(vec![
        ai_call("c1", "deploy", json!({"env": "prod"})),
        Message::new_ai_message("understood, standing down"),
    ]);
    let agent = create_deep_agent(
        Arc::clone(&model) as Arc<dyn ChatModel>,
        &[deploy],
        DeepAgentConfig::new().with_interrupt_on("deploy", InterruptConfig::enabled()),
    )
    .unwrap();

    let result = agent.invoke("ship it").await.unwrap();
    assert!(result.is_interrupt());
    let result = agent
        .resume(ResumeDecision::Reject {
            reason: "not during the freeze".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.output(), "understood, standing down");
    assert!(executed.lock().unwrap().is_empty());

    // the next model request carried the rejected response for c1
    let requests = model.recorded_requests().await;
    let last = requests.last().unwrap();
    let rejected = last
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c1"))
        .unwrap();
    let payload: Value = serde_json::from_str(&rejected.content).unwrap();
    assert_eq!(payload["status"], "rejected");
    assert_eq!(payload["reason"], "not during the freeze");
}

// A new turn over a partial tool batch sees matched pairs, with a
// synthetic cancellation for the abandoned call.
#[tokio::test]
async fn dangling_calls_are_repaired_on_the_next_turn() {
    let executed = Arc::new(StdMutex::new(Vec::new()));
    let deploy: Arc<dyn Tool> = Arc::new(DeployTool {
        executed: Arc::clone(&executed),
    });
    let model = ScriptedModel::new(vec![
        // first turn: one ordinary call, one approval-gated call; the run
        // suspends after ls answered, leaving deploy dangling
        Message::new_ai_message("").with_tool_calls(vec![
            ToolCall::new("c1", "ls", json!({"path": "/"})),
            ToolCall::new("c2", "deploy", json!({"env": "prod"})),
        ]),
        // second turn: abandoned the approval, asked something else
        Message::new_ai_message("moving on"),
    ]);
    let agent = create_deep_agent(
        Arc::clone(&model) as Arc<dyn ChatModel>,
        &[deploy],
        DeepAgentConfig::new().with_interrupt_on("deploy", InterruptConfig::enabled()),
    )
    .unwrap();

    let result = agent.invoke("inspect then ship").await.unwrap();
    assert!(result.is_interrupt());

    // instead of resuming, start a fresh turn
    let result = agent.invoke("never mind, skip the deploy").await.unwrap();
    assert_eq!(result.output(), "moving on");

    let requests = model.recorded_requests().await;
    let last = requests.last().unwrap();
    let cancelled = last
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .expect("synthetic response for the dangling call");
    let payload: Value = serde_json::from_str(&cancelled.content).unwrap();
    assert_eq!(payload["status"], "cancelled");
    assert!(executed.lock().unwrap().is_empty());

    // every call in the request is matched (property 1)
    for message in &last.messages {
        for call in &message.tool_calls {
            assert!(last
                .messages
                .iter()
                .any(|m| m.tool_call_id.as_deref() == Some(call.id.as_str())));
        }
    }
}

/// Child model that waits before answering, to race siblings.
struct DelayedModel {
    delay: Duration,
    reply: String,
}

#[async_trait]
impl ChatModel for DelayedModel {
    async fn chat(&self, _request: &ModelRequest) -> Result<Message, ModelError> {
        tokio::time::sleep(self.delay).await;
        Ok(Message::new_ai_message(self.reply.clone()))
    }

    fn model_id(&self) -> String {
        "delayed".to_string()
    }
}

// Sibling subagents run in parallel but stitch back in call order.
#[tokio::test]
async fn parallel_sibling_subagents_stitch_in_call_order() {
    let slow: Arc<dyn ChatModel> = Arc::new(DelayedModel {
        delay: Duration::from_millis(150),
        reply: "slow done".to_string(),
    });
    let fast: Arc<dyn ChatModel> = Arc::new(DelayedModel {
        delay: Duration::from_millis(1),
        reply: "fast done".to_string(),
    });
    let model = ScriptedModel::new(vec![
        Message::new_ai_message("").with_tool_calls(vec![
            ToolCall::new(
                "c1",
                "task",
                json!({"subagent_name": "slow", "description": "take your time"}),
            ),
            ToolCall::new(
                "c2",
                "task",
                json!({"subagent_name": "fast", "description": "be quick"}),
            ),
        ]),
        Message::new_ai_message("combined"),
    ]);
    let config = DeepAgentConfig::new()
        .with_subagent(SubAgentSpec::new("slow", "slow worker", "You are slow.").with_model(slow))
        .with_subagent(SubAgentSpec::new("fast", "fast worker", "You are fast.").with_model(fast));
    let agent = create_deep_agent(model, &[], config).unwrap();

    let started = std::time::Instant::now();
    let result = agent.invoke("do both").await.unwrap();
    assert_eq!(result.output(), "combined");
    // both children overlapped: well under the 151ms sequential floor x2
    assert!(started.elapsed() < Duration::from_millis(290));

    let state = agent.snapshot_state().await;
    let idx_slow = state
        .messages
        .iter()
        .position(|m| m.tool_call_id.as_deref() == Some("c1"))
        .unwrap();
    let idx_fast = state
        .messages
        .iter()
        .position(|m| m.tool_call_id.as_deref() == Some("c2"))
        .unwrap();
    assert!(idx_slow < idx_fast, "results must follow call order");
    assert_eq!(state.messages[idx_slow].content, "slow done");
    assert_eq!(state.messages[idx_fast].content, "fast done");
}

// Subagent isolation: shared-prefix files propagate, todos never do.
#[tokio::test]
async fn subagent_files_propagate_only_under_shared_prefixes() {
    let child_model = ScriptedModel::new(vec![
        ai_call(
            "w1",
            "write_file",
            json!({"path": "/shared/out.txt", "content": "from child"}),
        ),
        ai_call(
            "w2",
            "write_file",
            json!({"path": "/private/note.txt", "content": "secret"}),
        ),
        ai_call(
            "w3",
            "write_todos",
            json!({"todos": [{"content": "child planning"}]}),
        ),
        Message::new_ai_message("wrote the report"),
    ]);
    let parent_model = ScriptedModel::new(vec![
        ai_call(
            "c1",
            "task",
            json!({"subagent_name": "writer", "description": "write the report"}),
        ),
        Message::new_ai_message("delegated"),
    ]);
    let config = DeepAgentConfig::new()
        .with_shared_file_prefix("/shared")
        .with_subagent(
            SubAgentSpec::new("writer", "writes reports", "You write files.")
                .with_model(child_model),
        );
    let agent = create_deep_agent(parent_model, &[], config).unwrap();

    let result = agent.invoke("produce a report").await.unwrap();
    assert_eq!(result.output(), "delegated");

    let state = agent.snapshot_state().await;
    // the task result is the child's final assistant text only
    assert_eq!(tool_message_for(&state, "c1").content, "wrote the report");
    assert_eq!(
        state.files.get("/shared/out.txt").map(String::as_str),
        Some("from child")
    );
    assert!(!state.files.contains_key("/private/note.txt"));
    assert!(state.todos.is_empty());
}

#[tokio::test]
async fn unknown_subagent_surfaces_typed_error() {
    let model = ScriptedModel::new(vec![
        ai_call(
            "c1",
            "task",
            json!({"subagent_name": "ghost", "description": "boo"}),
        ),
        Message::new_ai_message("ok"),
    ]);
    let config = DeepAgentConfig::new().with_subagent(SubAgentSpec::new(
        "writer",
        "writes",
        "You write.",
    ));
    let agent = create_deep_agent(model, &[], config).unwrap();
    agent.invoke("delegate").await.unwrap();

    let state = agent.snapshot_state().await;
    let payload: Value = serde_json::from_str(&tool_message_for(&state, "c1").content).unwrap();
    assert_eq!(payload["error_kind"], "SubAgentError.UnknownSubAgent");
}

/// Middleware that records which hooks ran, tagged with its name.
struct Recorder {
    tag: &'static str,
    events: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Recorder {
    fn name(&self) -> &'static str {
        self.tag
    }

    async fn before_model(
        &self,
        _state: &mut AgentState,
        _ctx: &mut MiddlewareContext,
    ) -> Result<deepagents::middleware::BeforeModelOutcome, MiddlewareError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:before_model", self.tag));
        Ok(deepagents::middleware::BeforeModelOutcome::Continue)
    }

    async fn after_model(
        &self,
        _state: &mut AgentState,
        _assistant: &Message,
        _ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:after_model", self.tag));
        Ok(())
    }

    async fn before_tool_call(
        &self,
        _call: &ToolCall,
        _ctx: &mut MiddlewareContext,
    ) -> Result<deepagents::middleware::ToolCallDecision, MiddlewareError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:before_tool_call", self.tag));
        Ok(deepagents::middleware::ToolCallDecision::Proceed)
    }

    async fn after_tool_call(
        &self,
        _call: &ToolCall,
        _result: &mut Message,
        _ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:after_tool_call", self.tag));
        Ok(())
    }
}

// Documented ordering convention: before hooks in stack order, after hooks
// reversed.
#[tokio::test]
async fn hook_ordering_follows_the_stack_convention() {
    let events = Arc::new(StdMutex::new(Vec::new()));
    let model = ScriptedModel::new(vec![
        ai_call("c1", "ls", json!({"path": "/"})),
        Message::new_ai_message("done"),
    ]);
    let config = DeepAgentConfig::new()
        .with_middleware(Arc::new(Recorder {
            tag: "A",
            events: Arc::clone(&events),
        }))
        .with_middleware(Arc::new(Recorder {
            tag: "B",
            events: Arc::clone(&events),
        }));
    let agent = create_deep_agent(model, &[], config).unwrap();
    agent.invoke("look around").await.unwrap();

    let events = events.lock().unwrap().clone();
    let pos = |needle: &str| events.iter().position(|e| e == needle).unwrap();
    assert!(pos("A:before_model") < pos("B:before_model"));
    assert!(pos("B:after_model") < pos("A:after_model"));
    assert!(pos("A:before_tool_call") < pos("B:before_tool_call"));
    assert!(pos("B:after_tool_call") < pos("A:after_tool_call"));
}

/// Tool that never finishes on its own.
struct HangingTool;

#[async_trait]
impl Tool for HangingTool {
    fn name(&self) -> String {
        "long_job".to_string()
    }

    fn description(&self) -> String {
        "Runs for a very long time.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _args: Value, _runtime: &ToolRuntime) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        Ok("finished".to_string())
    }
}

// Cancellation: in-flight call gets a grace window, the rest are answered
// with cancellations, and the terminal checkpoint is tagged cancelled.
#[tokio::test]
async fn cancellation_produces_a_terminal_cancelled_checkpoint() {
    let saver = Arc::new(InMemorySaver::new());
    let model = ScriptedModel::new(vec![Message::new_ai_message("").with_tool_calls(vec![
        ToolCall::new("c1", "long_job", json!({})),
        ToolCall::new("c2", "long_job", json!({})),
    ])]);
    let hanging: Arc<dyn Tool> = Arc::new(HangingTool);
    let agent = create_deep_agent(
        model,
        &[hanging],
        DeepAgentConfig::new()
            .with_thread_id("cancel-thread")
            .with_checkpointer(Arc::clone(&saver) as Arc<dyn Checkpointer>),
    )
    .unwrap()
    .with_cancel_grace(Duration::from_millis(50));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let result = agent
        .invoke_with_cancellation("run the long job", token)
        .await
        .unwrap();
    assert!(matches!(result, AgentRunResult::Cancelled));

    let checkpoint = saver.get("cancel-thread", None).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Cancelled);
    // every call was answered, so the persisted state is valid
    assert!(checkpoint.state.dangling_tool_call_ids().is_empty());
    let cancelled: Value =
        serde_json::from_str(&tool_message_for(&checkpoint.state, "c1").content).unwrap();
    assert_eq!(cancelled["status"], "cancelled");
}

/// Model that always fails with a transport error.
struct BrokenModel;

#[async_trait]
impl ChatModel for BrokenModel {
    async fn chat(&self, _request: &ModelRequest) -> Result<Message, ModelError> {
        Err(ModelError::Transport("connection refused".to_string()))
    }

    fn model_id(&self) -> String {
        "broken".to_string()
    }
}

#[tokio::test]
async fn model_exhaustion_halts_with_failed_checkpoint() {
    let saver = Arc::new(InMemorySaver::new());
    let agent = create_deep_agent(
        Arc::new(BrokenModel),
        &[],
        DeepAgentConfig::new()
            .with_thread_id("broken-thread")
            .with_model_retry_limit(0)
            .with_checkpointer(Arc::clone(&saver) as Arc<dyn Checkpointer>),
    )
    .unwrap();

    let err = agent.invoke("hello").await.unwrap_err();
    assert!(matches!(err, deepagents::AgentError::Model(_)));
    let checkpoint = saver.get("broken-thread", None).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
}

// Checkpoints are totally ordered per thread and capture message growth.
#[tokio::test]
async fn checkpoints_are_ordered_per_thread() {
    let saver = Arc::new(InMemorySaver::new());
    let model = ScriptedModel::new(vec![
        ai_call("c1", "ls", json!({"path": "/"})),
        Message::new_ai_message("done"),
    ]);
    let agent = create_deep_agent(
        model,
        &[],
        DeepAgentConfig::new()
            .with_thread_id("ordered-thread")
            .with_checkpointer(Arc::clone(&saver) as Arc<dyn Checkpointer>),
    )
    .unwrap();
    agent.invoke("look").await.unwrap();

    let checkpoints = saver.list("ordered-thread", None).await.unwrap();
    assert!(checkpoints.len() >= 3);
    for pair in checkpoints.windows(2) {
        assert!(pair[0].step <= pair[1].step);
        assert!(pair[0].state.messages.len() <= pair[1].state.messages.len());
    }
    assert_eq!(
        checkpoints.last().unwrap().status,
        CheckpointStatus::Complete
    );
}

// A stale resume token is rejected (idempotent resume).
#[tokio::test]
async fn stale_resume_token_is_rejected() {
    let executed = Arc::new(StdMutex::new(Vec::new()));
    let deploy: Arc<dyn Tool> = Arc::new(DeployTool {
        executed: Arc::clone(&executed),
    });
    let model = ScriptedModel::new(vec![
        ai_call("c1", "deploy", json!({"env": "prod"})),
        Message::new_ai_message("done"),
    ]);
    let agent = create_deep_agent(
        model,
        &[deploy],
        DeepAgentConfig::new().with_interrupt_on("deploy", InterruptConfig::enabled()),
    )
    .unwrap();

    let result = agent.invoke("ship").await.unwrap();
    assert!(result.is_interrupt());
    let err = agent
        .resume_with_token("some-other-token", ResumeDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, deepagents::AgentError::StaleResumeToken(_)));
    assert!(executed.lock().unwrap().is_empty());
}
