//! The tool contract surfaced to the model.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::model::ToolSchema;

use super::runtime::ToolRuntime;

/// A named operation the model can invoke.
///
/// `parameters` returns the JSON schema of the arguments object, e.g.
///
/// ```json
/// {
///     "type": "object",
///     "properties": {
///         "path": { "type": "string", "description": "Absolute file path" }
///     },
///     "required": ["path"]
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;

    /// What the tool does and when to use it; shown to the model.
    fn description(&self) -> String;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Execute with parsed arguments and the injected runtime. The runtime is
    /// never exposed to the model schema.
    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError>;

    /// Tools are assumed non-pure and run sequentially. A tool that is safe
    /// to run concurrently with its siblings in one assistant message opts in
    /// here.
    fn parallel_safe(&self) -> bool {
        false
    }

    /// Schema entry for the model request.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// Pull a required string argument out of a tool input object.
pub fn required_str(args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ToolError::BadArguments(format!("missing required argument '{}'", key)))
}

/// Pull an optional string argument.
pub fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(String::from)
}

/// Pull an optional boolean argument, defaulting to `false`.
pub fn optional_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Pull an optional unsigned integer argument.
pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}
