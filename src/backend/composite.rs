//! Composite backend: longest-prefix routing over child backends.
//!
//! Each path is routed whole (children see the full absolute path; nothing
//! is stripped). Cross-backend operations (glob, grep) fan out over the
//! default and every route and merge under the global sort orders. The
//! composite holds no locks of its own; children serialize their writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::paths::{is_under, normalize};
use super::{
    sort_glob_paths, sort_grep_matches, ExecuteResult, FileBackend, FileInfo, GrepMatch,
    GrepOptions,
};
use crate::error::{FsError, PathError};

/// Routes by longest matching path prefix; unmatched paths go to `default`.
pub struct CompositeBackend {
    default: Arc<dyn FileBackend>,
    routes: Vec<(String, Arc<dyn FileBackend>)>,
}

impl CompositeBackend {
    pub fn new(default: Arc<dyn FileBackend>) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// Add a route: paths at or beneath `prefix` use `backend`. Longest
    /// prefix wins.
    pub fn with_route(
        mut self,
        prefix: impl AsRef<str>,
        backend: Arc<dyn FileBackend>,
    ) -> Result<Self, FsError> {
        let prefix = normalize(prefix.as_ref())?;
        self.routes.push((prefix, backend));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(self)
    }

    /// Backend owning `path`: `None` is the default. Routes are pre-sorted
    /// longest-first, so the first hit is the longest match.
    fn route_of(&self, path: &str) -> Option<usize> {
        self.routes
            .iter()
            .position(|(prefix, _)| is_under(prefix, path))
    }

    fn backend_for(&self, path: &str) -> &Arc<dyn FileBackend> {
        match self.route_of(path) {
            Some(i) => &self.routes[i].1,
            None => &self.default,
        }
    }

    /// All children in deterministic order: default first, then routes.
    fn children(&self) -> Vec<(Option<usize>, &Arc<dyn FileBackend>)> {
        let mut out: Vec<(Option<usize>, &Arc<dyn FileBackend>)> = vec![(None, &self.default)];
        out.extend(
            self.routes
                .iter()
                .enumerate()
                .map(|(i, (_, b))| (Some(i), b)),
        );
        out
    }
}

#[async_trait]
impl FileBackend for CompositeBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, FsError> {
        let dir = normalize(path)?;
        let mut out = match self.backend_for(&dir).ls_info(&dir).await {
            Ok(entries) => entries,
            Err(FsError::Path(PathError::NotFound(p))) => {
                // A route mounted below may still make this directory real.
                if self.routes.iter().any(|(prefix, _)| is_under(&dir, prefix)) {
                    Vec::new()
                } else {
                    return Err(PathError::NotFound(p).into());
                }
            }
            Err(e) => return Err(e),
        };
        // Surface route mount points beneath the listed directory.
        for (prefix, _) in &self.routes {
            if !is_under(&dir, prefix) || prefix == &dir {
                continue;
            }
            let rest = if dir == "/" {
                &prefix[1..]
            } else {
                &prefix[dir.len() + 1..]
            };
            let first = rest.split('/').next().unwrap_or(rest);
            let mount = if dir == "/" {
                format!("/{}", first)
            } else {
                format!("{}/{}", dir, first)
            };
            if !out.iter().any(|f| f.path == mount) {
                out.push(FileInfo {
                    path: mount,
                    is_dir: true,
                    size: 0,
                    modified_at: None,
                });
            }
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
        let path = normalize(path)?;
        self.backend_for(&path).read(&path, offset, limit).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), FsError> {
        let path = normalize(path)?;
        self.backend_for(&path).write(&path, content).await
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<u32, FsError> {
        let path = normalize(path)?;
        self.backend_for(&path)
            .edit(&path, old, new, replace_all)
            .await
    }

    async fn glob(&self, pattern: &str, root: &str) -> Result<Vec<String>, FsError> {
        let root = normalize(root)?;
        let mut merged = Vec::new();
        for (route, backend) in self.children() {
            let paths = match backend.glob(pattern, &root).await {
                Ok(paths) => paths,
                Err(FsError::Path(PathError::NotFound(_)))
                | Err(FsError::Path(PathError::NotDirectory(_))) => continue,
                Err(e) => return Err(e),
            };
            // Keep only paths this child actually owns under the routing
            // rules, so stale entries in another child never surface.
            merged.extend(paths.into_iter().filter(|p| self.route_of(p) == route));
        }
        sort_glob_paths(&mut merged);
        Ok(merged)
    }

    async fn grep(
        &self,
        pattern: &str,
        root: &str,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>, FsError> {
        let root = normalize(root)?;
        let mut merged = Vec::new();
        for (route, backend) in self.children() {
            let hits = match backend.grep(pattern, &root, options).await {
                Ok(hits) => hits,
                Err(FsError::Path(PathError::NotFound(_)))
                | Err(FsError::Path(PathError::NotDirectory(_))) => continue,
                Err(e) => return Err(e),
            };
            merged.extend(hits.into_iter().filter(|h| self.route_of(&h.path) == route));
        }
        sort_grep_matches(&mut merged);
        if let Some(max) = options.max_hits {
            merged.truncate(max);
        }
        Ok(merged)
    }

    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        let path = normalize(path)?;
        self.backend_for(&path).exists(&path).await
    }

    fn supports_execute(&self) -> bool {
        self.default.supports_execute()
    }

    async fn execute(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecuteResult, FsError> {
        self.default.execute(command, cwd, timeout).await
    }
}
