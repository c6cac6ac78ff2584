//! Disk backend: real files under a configured root directory.
//!
//! Paths are interpreted relative to the root after the leading `/`;
//! symlinks are resolved and the realpath must stay beneath the root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::edits::{apply_edit, structural_grep, GrepFlags};
use super::paths::{anchored_pattern, confine_to_root, doublestar_match, normalize, safe_join};
use super::{
    slice_bytes, sort_glob_paths, sort_grep_matches, ExecuteResult, FileBackend, FileInfo,
    GrepMatch, GrepOptions,
};
use crate::error::{BackendError, FsError, PathError};

/// Narrow contract over a shell sandbox provider. Supplying one enables the
/// backend's `execute` capability; the harness itself never shells out.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ExecuteResult, BackendError>;
}

/// Backend over the real filesystem, sandboxed beneath `root`.
pub struct FilesystemBackend {
    root: PathBuf,
    sandbox: Option<std::sync::Arc<dyn Sandbox>>,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sandbox: None,
        }
    }

    /// Attach a sandbox handle, enabling the `execute` capability.
    pub fn with_sandbox(mut self, sandbox: std::sync::Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Resolve a virtual absolute path to a confined OS path.
    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let joined = safe_join(&self.root, path)?;
        Ok(confine_to_root(&self.root, &joined)?)
    }

    /// Present an OS path under the root as a virtual absolute path.
    fn virtualize(&self, os_path: &Path) -> String {
        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let rel = os_path
            .strip_prefix(&canonical_root)
            .or_else(|_| os_path.strip_prefix(&self.root))
            .unwrap_or(os_path);
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", rel)
        }
    }

    /// Recursively collect files under `dir`, skipping anything whose
    /// realpath escapes the root.
    fn walk_files(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), FsError> {
        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !canonical.starts_with(&canonical_root) {
                continue;
            }
            if path.is_dir() {
                self.walk_files(&path, out)?;
            } else {
                out.push(canonical);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileBackend for FilesystemBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, FsError> {
        let dir = self.resolve(path)?;
        if !dir.exists() {
            return Err(PathError::NotFound(normalize(path)?).into());
        }
        if !dir.is_dir() {
            return Err(PathError::NotDirectory(normalize(path)?).into());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let modified_at = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs());
            out.push(FileInfo {
                path: self.virtualize(&entry.path()),
                is_dir: meta.is_dir(),
                size: meta.len(),
                modified_at,
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn read(
        &self,
        path: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<String, FsError> {
        let os_path = self.resolve(path)?;
        if os_path.is_dir() {
            return Err(PathError::IsDirectory(normalize(path)?).into());
        }
        if !os_path.exists() {
            return Err(PathError::NotFound(normalize(path)?).into());
        }
        let content = std::fs::read_to_string(&os_path)?;
        Ok(slice_bytes(&content, offset, limit))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), FsError> {
        let os_path = self.resolve(path)?;
        if let Some(parent) = os_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&os_path, content)?;
        Ok(())
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<u32, FsError> {
        let os_path = self.resolve(path)?;
        if !os_path.exists() {
            return Err(PathError::NotFound(normalize(path)?).into());
        }
        let content = std::fs::read_to_string(&os_path)?;
        let (updated, count) = apply_edit(&content, old, new, replace_all)?;
        std::fs::write(&os_path, updated)?;
        Ok(count)
    }

    async fn glob(&self, pattern: &str, root: &str) -> Result<Vec<String>, FsError> {
        let base = self.resolve(root)?;
        let root = normalize(root)?;
        if !base.is_dir() {
            return Err(PathError::NotDirectory(root).into());
        }
        let pattern = anchored_pattern(pattern, &root)?;
        let mut files = Vec::new();
        self.walk_files(&base, &mut files)?;
        let mut out: Vec<String> = files
            .iter()
            .map(|p| self.virtualize(p))
            .filter(|virt| doublestar_match(&pattern, virt))
            .collect();
        sort_glob_paths(&mut out);
        Ok(out)
    }

    async fn grep(
        &self,
        pattern: &str,
        root: &str,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>, FsError> {
        let base = self.resolve(root)?;
        let root = normalize(root)?;
        let include = options
            .include
            .as_deref()
            .map(|p| anchored_pattern(p, &root))
            .transpose()?;
        let flags = GrepFlags {
            case_insensitive: options.case_insensitive,
            max_hits: None,
        };
        let candidates: Vec<PathBuf> = if base.is_file() {
            vec![base]
        } else {
            let mut files = Vec::new();
            self.walk_files(&base, &mut files)?;
            files
        };
        let mut matches = Vec::new();
        for os_path in candidates {
            let virt = self.virtualize(&os_path);
            if let Some(ref inc) = include {
                if !doublestar_match(inc, &virt) {
                    continue;
                }
            }
            let content = match std::fs::read_to_string(&os_path) {
                Ok(c) => c,
                Err(_) => continue, // binary or unreadable
            };
            let hits = structural_grep(&content, pattern, &flags)
                .map_err(|e| FsError::InvalidPattern(e.to_string()))?;
            for (line, text) in hits {
                matches.push(GrepMatch {
                    path: virt.clone(),
                    line,
                    text,
                });
            }
        }
        sort_grep_matches(&mut matches);
        if let Some(max) = options.max_hits {
            matches.truncate(max);
        }
        Ok(matches)
    }

    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        match self.resolve(path) {
            Ok(os_path) => Ok(os_path.exists()),
            Err(FsError::Path(PathError::PathOutsideRoot(p))) => {
                Err(PathError::PathOutsideRoot(p).into())
            }
            Err(e) => Err(e),
        }
    }

    fn supports_execute(&self) -> bool {
        self.sandbox.is_some()
    }

    async fn execute(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecuteResult, FsError> {
        let sandbox = self.sandbox.as_ref().ok_or_else(|| {
            FsError::Backend(BackendError::CapabilityUnavailable("execute".to_string()))
        })?;
        let cwd_os = cwd.map(|c| self.resolve(c)).transpose()?;
        Ok(sandbox
            .run(command, cwd_os.as_deref(), timeout)
            .await
            .map_err(FsError::Backend)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandboxed() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn write_creates_parents_and_reads_back() {
        let (_dir, b) = sandboxed();
        b.write("/nested/deep/file.txt", "content").await.unwrap();
        assert_eq!(
            b.read("/nested/deep/file.txt", 0, None).await.unwrap(),
            "content"
        );
        assert!(b.exists("/nested/deep/file.txt").await.unwrap());
        assert!(!b.exists("/other.txt").await.unwrap());
    }

    #[tokio::test]
    async fn relative_and_escaping_paths_are_rejected() {
        let (_dir, b) = sandboxed();
        let err = b.read("../etc/passwd", 0, None).await.unwrap_err();
        assert!(matches!(err, FsError::Path(PathError::NotAbsolute(_))));
        let err = b.read("/../etc/passwd", 0, None).await.unwrap_err();
        assert!(matches!(
            err,
            FsError::Path(PathError::PathOutsideRoot(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_outside_root() {
        let (dir, b) = sandboxed();
        std::os::unix::fs::symlink("/etc", dir.path().join("escape")).unwrap();
        let err = b.read("/escape/passwd", 0, None).await.unwrap_err();
        assert!(matches!(
            err,
            FsError::Path(PathError::PathOutsideRoot(_))
        ));
    }

    #[tokio::test]
    async fn glob_returns_virtual_paths_sorted() {
        let (_dir, b) = sandboxed();
        b.write("/src/b.rs", "").await.unwrap();
        b.write("/src/a.rs", "").await.unwrap();
        b.write("/src/inner/c.rs", "").await.unwrap();
        b.write("/notes.md", "").await.unwrap();
        let paths = b.glob("**/*.rs", "/").await.unwrap();
        assert_eq!(paths, vec!["/src/a.rs", "/src/b.rs", "/src/inner/c.rs"]);
    }

    #[tokio::test]
    async fn grep_hits_are_ordered() {
        let (_dir, b) = sandboxed();
        b.write("/b.txt", "match here\nnothing\nmatch again").await.unwrap();
        b.write("/a.txt", "one match").await.unwrap();
        let hits = b.grep("match", "/", &GrepOptions::default()).await.unwrap();
        let got: Vec<(&str, u32)> = hits.iter().map(|h| (h.path.as_str(), h.line)).collect();
        assert_eq!(got, vec![("/a.txt", 1), ("/b.txt", 1), ("/b.txt", 3)]);
    }

    struct EchoSandbox;

    #[async_trait]
    impl Sandbox for EchoSandbox {
        async fn run(
            &self,
            command: &str,
            _cwd: Option<&Path>,
            _timeout: Option<Duration>,
        ) -> Result<ExecuteResult, BackendError> {
            Ok(ExecuteResult {
                stdout: command.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    #[tokio::test]
    async fn execute_requires_sandbox() {
        let (_dir, b) = sandboxed();
        assert!(!b.supports_execute());
        let err = b.execute("true", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            FsError::Backend(BackendError::CapabilityUnavailable(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let b = FilesystemBackend::new(dir.path()).with_sandbox(std::sync::Arc::new(EchoSandbox));
        assert!(b.supports_execute());
        let result = b.execute("echo hi", None, None).await.unwrap();
        assert_eq!(result.stdout, "echo hi");
        assert_eq!(result.exit_code, 0);
    }
}
