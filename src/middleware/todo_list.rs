//! Planning middleware: the todo-list scratchpad.
//!
//! Contributes `write_todos` and `read_todos` and injects planner
//! instructions into the system prompt. The behavioral contract is only that
//! `state.todos` mirrors the last accepted write exactly.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Middleware, MiddlewareContext, MiddlewareError};
use crate::agent::AgentState;
use crate::error::ToolError;
use crate::model::ModelRequest;
use crate::schemas::{Message, MessageType, Todo, TodoStatus};
use crate::tools::{Tool, ToolRuntime};

const PLANNER_INSTRUCTIONS: &str = "Use write_todos to break complex work into steps and track \
progress as you go; keep at most one item in_progress. Use read_todos to recall the current plan.";

/// Middleware wiring the planning scratchpad into the agent.
#[derive(Default)]
pub struct TodoListMiddleware;

impl TodoListMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for TodoListMiddleware {
    fn name(&self) -> &'static str {
        "todo_list"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(WriteTodosTool), Arc::new(ReadTodosTool)]
    }

    async fn modify_model_request(
        &self,
        request: &mut ModelRequest,
        _state: &AgentState,
        _ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        match request
            .messages
            .iter_mut()
            .find(|m| m.message_type == MessageType::SystemMessage)
        {
            Some(system) => {
                if !system.content.contains(PLANNER_INSTRUCTIONS) {
                    system.content = format!("{}\n\n{}", system.content, PLANNER_INSTRUCTIONS);
                }
            }
            None => request
                .messages
                .insert(0, Message::new_system_message(PLANNER_INSTRUCTIONS)),
        }
        Ok(())
    }
}

/// Parse and validate the `todos` argument array into a full replacement list.
fn parse_todos(args: &Value) -> Result<Vec<Todo>, ToolError> {
    let items = args
        .get("todos")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::BadArguments("missing required array 'todos'".to_string()))?;

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut todos = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let content = item
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ToolError::BadArguments(format!(
                "todo {} has empty content",
                i
            )));
        }
        let status = match item.get("status").and_then(Value::as_str) {
            None => TodoStatus::Pending,
            Some(s) => TodoStatus::parse(s).ok_or_else(|| {
                ToolError::BadArguments(format!(
                    "todo {} has illegal status '{}' (expected pending, in_progress, completed)",
                    i, s
                ))
            })?,
        };
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("todo_{}", i + 1));
        if !seen_ids.insert(id.clone()) {
            return Err(ToolError::BadArguments(format!("duplicate todo id '{}'", id)));
        }
        todos.push(Todo::new(id, content, status));
    }
    Ok(todos)
}

/// Replaces the whole todo list.
pub struct WriteTodosTool;

#[async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> String {
        "write_todos".to_string()
    }

    fn description(&self) -> String {
        "Write the current to-do list, replacing it entirely. Pass the full list each time; \
         each item has 'content' and a 'status' of pending, in_progress, or completed."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Full replacement list of todo items.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["content"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let todos = parse_todos(&args)?;
        let count = todos.len();
        let mut state = runtime.state().await;
        state.todos = todos;
        Ok(format!("Todo list updated ({} items).", count))
    }
}

/// Returns the current todo list as JSON.
pub struct ReadTodosTool;

#[async_trait]
impl Tool for ReadTodosTool {
    fn name(&self) -> String {
        "read_todos".to_string()
    }

    fn description(&self) -> String {
        "Read the current to-do list.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let state = runtime.state().await;
        serde_json::to_string_pretty(&state.todos)
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StateBackend;
    use crate::tools::InMemoryStore;
    use tokio::sync::Mutex;

    fn runtime() -> (Arc<Mutex<AgentState>>, ToolRuntime) {
        let state = Arc::new(Mutex::new(AgentState::new()));
        let backend = Arc::new(StateBackend::new(Arc::clone(&state)));
        let store = Arc::new(InMemoryStore::new());
        let runtime = ToolRuntime::new(Arc::clone(&state), backend, store, "call_1");
        (state, runtime)
    }

    #[tokio::test]
    async fn write_replaces_and_read_mirrors() {
        let (state, rt) = runtime();
        let args = json!({"todos": [
            {"content": "a", "status": "pending"},
            {"content": "b", "status": "in_progress"},
        ]});
        WriteTodosTool.run(args, &rt).await.unwrap();
        {
            let guard = state.lock().await;
            assert_eq!(guard.todos.len(), 2);
            assert_eq!(guard.todos[1].status, TodoStatus::InProgress);
        }
        let args = json!({"todos": [{"content": "only", "status": "completed"}]});
        WriteTodosTool.run(args, &rt).await.unwrap();
        let listed = ReadTodosTool.run(json!({}), &rt).await.unwrap();
        let parsed: Vec<Todo> = serde_json::from_str(&listed).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].content, "only");
    }

    #[tokio::test]
    async fn validation_rejects_bad_items() {
        let (_state, rt) = runtime();
        let err = WriteTodosTool
            .run(json!({"todos": [{"content": ""}]}), &rt)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArguments(_)));

        let err = WriteTodosTool
            .run(json!({"todos": [{"content": "x", "status": "done"}]}), &rt)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArguments(_)));

        let err = WriteTodosTool
            .run(
                json!({"todos": [
                    {"id": "t", "content": "x"},
                    {"id": "t", "content": "y"},
                ]}),
                &rt,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArguments(_)));
    }

    #[tokio::test]
    async fn planner_prompt_is_injected_once() {
        let mw = TodoListMiddleware::new();
        let state = AgentState::new();
        let mut ctx = MiddlewareContext::new("t", "r");
        let mut request = ModelRequest::new(
            vec![Message::new_system_message("base prompt")],
            vec![],
            "m",
        );
        mw.modify_model_request(&mut request, &state, &mut ctx)
            .await
            .unwrap();
        mw.modify_model_request(&mut request, &state, &mut ctx)
            .await
            .unwrap();
        let system = &request.messages[0];
        assert_eq!(system.content.matches("write_todos").count(), 1);
        assert!(system.content.starts_with("base prompt"));
    }
}
