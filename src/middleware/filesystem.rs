//! Filesystem middleware: file tools over the active backend, plus context
//! offload for oversized tool results.
//!
//! Each tool is a thin translator over the [FileBackend] contract. The
//! `execute` tool is surfaced only when the backend advertises the
//! capability. Results larger than the configured threshold are written to
//! `/tool_outputs/<call_id>` and replaced with a short stub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Middleware, MiddlewareContext, MiddlewareError};
use crate::agent::AgentState;
use crate::backend::{FileBackend, GrepOptions};
use crate::error::ToolError;
use crate::model::ModelRequest;
use crate::schemas::{Message, MessageType, ToolCall};
use crate::tools::{optional_bool, optional_str, optional_u64, required_str, Tool, ToolRuntime};

const FILESYSTEM_INSTRUCTIONS: &str = "File paths are absolute and start with '/'. Use ls, \
read_file, write_file, edit_file, glob, and grep to inspect and change files.";

/// Directory oversized tool results are offloaded into.
pub const TOOL_OUTPUTS_DIR: &str = "/tool_outputs";

/// Middleware wiring filesystem tools and the offload policy.
pub struct FilesystemMiddleware {
    backend: Arc<dyn FileBackend>,
    offload_threshold_bytes: usize,
    offload_preview_bytes: usize,
}

impl FilesystemMiddleware {
    pub fn new(backend: Arc<dyn FileBackend>) -> Self {
        Self {
            backend,
            offload_threshold_bytes: 20_000,
            offload_preview_bytes: 512,
        }
    }

    /// Offload results larger than this many bytes.
    pub fn with_offload_threshold(mut self, bytes: usize) -> Self {
        self.offload_threshold_bytes = bytes;
        self
    }

    pub fn with_offload_preview(mut self, bytes: usize) -> Self {
        self.offload_preview_bytes = bytes;
        self
    }
}

#[async_trait]
impl Middleware for FilesystemMiddleware {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(LsTool),
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(EditFileTool),
            Arc::new(GlobTool),
            Arc::new(GrepTool),
        ];
        if self.backend.supports_execute() {
            tools.push(Arc::new(ExecuteTool));
        }
        tools
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
                if !system.content.contains(FILESYSTEM_INSTRUCTIONS) {
                    system.content = format!("{}\n\n{}", system.content, FILESYSTEM_INSTRUCTIONS);
                }
            }
            None => request
                .messages
                .insert(0, Message::new_system_message(FILESYSTEM_INSTRUCTIONS)),
        }
        Ok(())
    }

    async fn after_tool_call(
        &self,
        call: &ToolCall,
        result: &mut Message,
        _ctx: &mut MiddlewareContext,
    ) -> Result<(), MiddlewareError> {
        let size = result.content.len();
        if size <= self.offload_threshold_bytes {
            return Ok(());
        }
        let path = format!("{}/{}", TOOL_OUTPUTS_DIR, call.id);
        self.backend
            .write(&path, &result.content)
            .await
            .map_err(|e| MiddlewareError::Execution(format!("offload write failed: {}", e)))?;
        let preview = preview_bytes(&result.content, self.offload_preview_bytes).to_string();
        result.content = format!("{} bytes written to {}; preview: {}", size, path, preview);
        Ok(())
    }
}

/// First `n` bytes of `content`, cut back to a char boundary.
fn preview_bytes(content: &str, n: usize) -> &str {
    if content.len() <= n {
        return content;
    }
    let mut end = n;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// List a directory.
pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> String {
        "ls".to_string()
    }

    fn description(&self) -> String {
        "List entries of a directory. Directories are suffixed with '/'.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute directory path" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let entries = runtime.backend().ls_info(&path).await?;
        if entries.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.path)
                } else {
                    format!("{} ({} bytes)", e.path, e.size)
                }
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Read a file, rendered with 1-based line numbers. `offset`/`limit` are
/// line-addressed here; the backend itself is byte-addressed.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> String {
        "read_file".to_string()
    }

    fn description(&self) -> String {
        "Read a file. Optionally pass offset (1-based start line) and limit (max lines) \
         for large files."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute file path" },
                "offset": { "type": "integer", "description": "Start line (1-based)" },
                "limit": { "type": "integer", "description": "Max lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let offset = optional_u64(&args, "offset").unwrap_or(0) as usize;
        let limit = optional_u64(&args, "limit").unwrap_or(0) as usize;
        let content = runtime.backend().read(&path, 0, None).await?;
        let lines: Vec<&str> = content.lines().collect();
        let start = if offset > 0 {
            (offset - 1).min(lines.len())
        } else {
            0
        };
        let end = if limit > 0 {
            (start + limit).min(lines.len())
        } else {
            lines.len()
        };
        let numbered: Vec<String> = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:6}\t{}", start + i + 1, line))
            .collect();
        Ok(numbered.join("\n"))
    }
}

/// Write (replace) a file.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> String {
        "write_file".to_string()
    }

    fn description(&self) -> String {
        "Write content to a file, replacing it if it exists. Parent directories are created."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute file path" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        runtime.backend().write(&path, &content).await?;
        Ok("ok".to_string())
    }
}

/// Structural edit: replace old_string with new_string.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> String {
        "edit_file".to_string()
    }

    fn description(&self) -> String {
        "Replace old_string with new_string in a file. Fails unless old_string occurs exactly \
         once; pass replace_all to replace every occurrence."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute file path" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean", "description": "Replace all occurrences" }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let old = required_str(&args, "old_string")?;
        let new = required_str(&args, "new_string")?;
        let replace_all = optional_bool(&args, "replace_all");
        let count = runtime
            .backend()
            .edit(&path, &old, &new, replace_all)
            .await?;
        Ok(format!("{}", count))
    }
}

/// Find files by doublestar pattern.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> String {
        "glob".to_string()
    }

    fn description(&self) -> String {
        "List files matching a glob pattern ('**' spans directories). Results are sorted."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Doublestar pattern, e.g. **/*.rs" },
                "path": { "type": "string", "description": "Root to search under; default /" }
            },
            "required": ["pattern"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let root = optional_str(&args, "path").unwrap_or_else(|| "/".to_string());
        let paths = runtime.backend().glob(&pattern, &root).await?;
        if paths.is_empty() {
            Ok("(no matches)".to_string())
        } else {
            Ok(paths.join("\n"))
        }
    }
}

/// Search file contents by regex.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> String {
        "grep".to_string()
    }

    fn description(&self) -> String {
        "Search file contents with a regex. Hits are reported as path:line: text.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression" },
                "path": { "type": "string", "description": "Root to search under; default /" },
                "include": { "type": "string", "description": "Restrict files by glob pattern" },
                "-i": { "type": "boolean", "description": "Case-insensitive search" }
            },
            "required": ["pattern"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let root = optional_str(&args, "path").unwrap_or_else(|| "/".to_string());
        let options = GrepOptions {
            include: optional_str(&args, "include"),
            case_insensitive: optional_bool(&args, "-i"),
            max_hits: None,
        };
        let hits = runtime.backend().grep(&pattern, &root, &options).await?;
        if hits.is_empty() {
            Ok("(no matches)".to_string())
        } else {
            let lines: Vec<String> = hits
                .iter()
                .map(|h| format!("{}:{}: {}", h.path, h.line, h.text))
                .collect();
            Ok(lines.join("\n"))
        }
    }
}

/// Run a shell command; present only when the backend has the capability.
pub struct ExecuteTool;

#[async_trait]
impl Tool for ExecuteTool {
    fn name(&self) -> String {
        "execute".to_string()
    }

    fn description(&self) -> String {
        "Run a shell command in the sandbox and return stdout, stderr, and the exit code."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "cwd": { "type": "string", "description": "Working directory; default /" },
                "timeout": { "type": "integer", "description": "Timeout in seconds" }
            },
            "required": ["command"]
        })
    }

    async fn run(&self, args: Value, runtime: &ToolRuntime) -> Result<String, ToolError> {
        let command = required_str(&args, "command")?;
        let cwd = optional_str(&args, "cwd");
        let timeout = optional_u64(&args, "timeout").map(Duration::from_secs);
        let result = runtime
            .backend()
            .execute(&command, cwd.as_deref(), timeout)
            .await?;
        serde_json::to_string(&result).map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}
