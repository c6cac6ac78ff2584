//! Unified error types for the deep agent harness.
//!
//! Every fallible surface returns one of these structured enums; tool-visible
//! failures are additionally rendered into a `{error_kind, message}` payload
//! so the model can react and the run continues.

use serde_json::{json, Value};
use thiserror::Error;

/// Path validation and resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path must be absolute (start with '/'): {0}")]
    NotAbsolute(String),

    #[error("Path must not traverse with '..': {0}")]
    Traversal(String),

    #[error("Path resolves outside the configured root: {0}")]
    PathOutsideRoot(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path is a directory: {0}")]
    IsDirectory(String),

    #[error("Path is not a directory: {0}")]
    NotDirectory(String),
}

/// Structural edit failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("old_string not found in content")]
    OldNotFound,

    #[error("old_string occurs {0} times; pass replace_all to replace every occurrence")]
    OldNotUnique(usize),

    #[error("old_string must not be empty")]
    EmptyOldString,

    #[error("old_string and new_string are identical")]
    NoChange,
}

/// Storage-level backend failures.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Backend does not support this capability: {0}")]
    CapabilityUnavailable(String),
}

/// Composition of everything a [crate::backend::FileBackend] operation can fail with.
#[derive(Error, Debug)]
pub enum FsError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        FsError::Backend(BackendError::IOError(e))
    }
}

/// Tool dispatch and execution failures.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Bad tool arguments: {0}")]
    BadArguments(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Tool call was cancelled: {0}")]
    Cancelled(String),

    #[error("Tool call was rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    SubAgent(#[from] SubAgentError),

    #[error("Tool execution error: {0}")]
    ExecutionError(String),
}

/// Subagent dispatch failures.
#[derive(Error, Debug)]
pub enum SubAgentError {
    #[error("Unknown subagent: {0}")]
    UnknownSubAgent(String),

    #[error("Subagent compilation failed: {0}")]
    CompilationFailed(String),

    #[error("Subagent run failed: {0}")]
    ChildFailed(String),
}

/// Model invocation failures.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model transport error: {0}")]
    Transport(String),

    #[error("Model rate limited: {0}")]
    RateLimited(String),

    #[error("Model returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Transport and rate-limit errors are transient and retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transport(_) | ModelError::RateLimited(_))
    }
}

/// State consistency failures. Dangling tool calls are repaired by the patch
/// middleware, so this surfaces only when repair is disabled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Assistant tool call {0} has no matching tool response")]
    DanglingToolCall(String),
}

/// Top-level error for agent assembly and execution.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    SubAgent(#[from] SubAgentError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("No pending interrupt to resume (thread {0})")]
    NothingToResume(String),

    #[error("Resume token does not match the pending interrupt: {0}")]
    StaleResumeToken(String),

    #[error("Agent configuration error: {0}")]
    Configuration(String),
}

/// Render an error into the tool message body the model sees:
/// `{"error_kind": ..., "message": ...}`.
pub fn tool_error_payload(kind: &str, message: impl std::fmt::Display) -> Value {
    json!({ "error_kind": kind, "message": message.to_string() })
}

/// Kind tag used in tool-visible payloads, one level deep (e.g. `PathError.NotFound`).
pub trait ErrorKind {
    fn error_kind(&self) -> String;
}

impl ErrorKind for PathError {
    fn error_kind(&self) -> String {
        let variant = match self {
            PathError::NotAbsolute(_) => "NotAbsolute",
            PathError::Traversal(_) => "Traversal",
            PathError::PathOutsideRoot(_) => "PathOutsideRoot",
            PathError::NotFound(_) => "NotFound",
            PathError::IsDirectory(_) => "IsDirectory",
            PathError::NotDirectory(_) => "NotDirectory",
        };
        format!("PathError.{}", variant)
    }
}

impl ErrorKind for EditError {
    fn error_kind(&self) -> String {
        let variant = match self {
            EditError::OldNotFound => "OldNotFound",
            EditError::OldNotUnique(_) => "OldNotUnique",
            EditError::EmptyOldString => "EmptyOldString",
            EditError::NoChange => "NoChange",
        };
        format!("EditError.{}", variant)
    }
}

impl ErrorKind for BackendError {
    fn error_kind(&self) -> String {
        let variant = match self {
            BackendError::IOError(_) => "IOError",
            BackendError::PermissionDenied(_) => "PermissionDenied",
            BackendError::CapabilityUnavailable(_) => "CapabilityUnavailable",
        };
        format!("BackendError.{}", variant)
    }
}

impl ErrorKind for FsError {
    fn error_kind(&self) -> String {
        match self {
            FsError::Path(e) => e.error_kind(),
            FsError::Edit(e) => e.error_kind(),
            FsError::Backend(e) => e.error_kind(),
            FsError::InvalidPattern(_) => "ToolError.BadArguments".to_string(),
        }
    }
}

impl ErrorKind for ToolError {
    fn error_kind(&self) -> String {
        let variant = match self {
            ToolError::UnknownTool(_) => "UnknownTool",
            ToolError::BadArguments(_) => "BadArguments",
            ToolError::Timeout(_) => "Timeout",
            ToolError::Cancelled(_) => "Cancelled",
            ToolError::Rejected(_) => "Rejected",
            ToolError::Fs(e) => return e.error_kind(),
            ToolError::SubAgent(e) => return e.error_kind(),
            ToolError::ExecutionError(_) => "ExecutionError",
        };
        format!("ToolError.{}", variant)
    }
}

impl ErrorKind for SubAgentError {
    fn error_kind(&self) -> String {
        let variant = match self {
            SubAgentError::UnknownSubAgent(_) => "UnknownSubAgent",
            SubAgentError::CompilationFailed(_) => "CompilationFailed",
            SubAgentError::ChildFailed(_) => "ChildFailed",
        };
        format!("SubAgentError.{}", variant)
    }
}
