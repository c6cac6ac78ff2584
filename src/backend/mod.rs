//! Pluggable filesystem backends.
//!
//! A [FileBackend] gives the filesystem tools a uniform contract over
//! heterogeneous storage: agent state ([StateBackend]), real disk
//! ([FilesystemBackend]), a key-value store ([StoreBackend]), or a
//! prefix-routing composite ([CompositeBackend]). All paths crossing this
//! boundary are absolute; backends enforce the invariants of [paths] before
//! touching storage.

pub mod composite;
pub mod disk;
pub mod edits;
pub mod paths;
pub mod state;
pub mod store;

pub use composite::CompositeBackend;
pub use disk::{FilesystemBackend, Sandbox};
pub use state::StateBackend;
pub use store::StoreBackend;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, FsError};

/// Metadata for a single file or directory entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute path.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the epoch, when the storage tracks it.
    pub modified_at: Option<u64>,
}

/// One grep hit: absolute path, 1-based line number, line text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line: u32,
    pub text: String,
}

/// Options for [FileBackend::grep].
#[derive(Clone, Debug, Default)]
pub struct GrepOptions {
    /// Restrict files by doublestar pattern (relative patterns anchor at the
    /// search root).
    pub include: Option<String>,
    pub case_insensitive: bool,
    pub max_hits: Option<usize>,
}

/// Result of an [FileBackend::execute] invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Uniform contract over pluggable storage.
///
/// `read` is byte-addressed; line-oriented presentation is derived above the
/// backend by the filesystem tools. Backends must be safe for concurrent
/// reads; write serialization is each backend's own responsibility.
#[async_trait]
pub trait FileBackend: Send + Sync {
    /// List the entries directly under `path`, sorted by path.
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, FsError>;

    /// Read file content starting at byte `offset`, up to `limit` bytes.
    async fn read(&self, path: &str, offset: usize, limit: Option<usize>)
        -> Result<String, FsError>;

    /// Write content, replacing any existing file. Parent directories are
    /// created as needed.
    async fn write(&self, path: &str, content: &str) -> Result<(), FsError>;

    /// Replace `old` with `new`; semantics of [edits::apply_edit]. Returns
    /// the replacement count.
    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<u32, FsError>;

    /// Absolute paths of files under `root` matching the doublestar
    /// `pattern`, sorted lexicographically.
    async fn glob(&self, pattern: &str, root: &str) -> Result<Vec<String>, FsError>;

    /// Regex search over file contents under `root`; hits ordered by
    /// `(path, line)`.
    async fn grep(
        &self,
        pattern: &str,
        root: &str,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>, FsError>;

    async fn exists(&self, path: &str) -> Result<bool, FsError>;

    /// Whether [FileBackend::execute] is available. When false the `execute`
    /// tool is not surfaced to the model.
    fn supports_execute(&self) -> bool {
        false
    }

    /// Run a shell command. Backends without the capability return
    /// `BackendError::CapabilityUnavailable`.
    async fn execute(
        &self,
        command: &str,
        _cwd: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<ExecuteResult, FsError> {
        let _ = command;
        Err(BackendError::CapabilityUnavailable("execute".to_string()).into())
    }
}

/// Slice `content` byte-wise for [FileBackend::read]. Out-of-range offsets
/// yield an empty string; slicing never splits the result away from valid
/// UTF-8 (lossy at the cut points).
pub(crate) fn slice_bytes(content: &str, offset: usize, limit: Option<usize>) -> String {
    let bytes = content.as_bytes();
    if offset >= bytes.len() {
        return String::new();
    }
    let end = match limit {
        Some(limit) => (offset + limit).min(bytes.len()),
        None => bytes.len(),
    };
    String::from_utf8_lossy(&bytes[offset..end]).into_owned()
}

/// Shared ordering for glob results.
pub(crate) fn sort_glob_paths(paths: &mut Vec<String>) {
    paths.sort();
    paths.dedup();
}

/// Shared ordering for grep hits.
pub(crate) fn sort_grep_matches(matches: &mut [GrepMatch]) {
    matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
}
