//! In-state backend: files live inside [AgentState], making runs hermetic
//! and checkpointable. This is the default backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::edits::{apply_edit, structural_grep, GrepFlags};
use super::paths::{anchored_pattern, doublestar_match, is_under, normalize};
use super::{
    slice_bytes, sort_glob_paths, sort_grep_matches, FileBackend, FileInfo, GrepMatch, GrepOptions,
};
use crate::agent::AgentState;
use crate::error::{FsError, PathError};

/// Backend whose storage is the `files` map of the shared [AgentState].
/// Writes are visible to checkpoints taken at the next step boundary.
pub struct StateBackend {
    state: Arc<Mutex<AgentState>>,
}

impl StateBackend {
    pub fn new(state: Arc<Mutex<AgentState>>) -> Self {
        Self { state }
    }

    async fn content_of(&self, path: &str) -> Result<String, FsError> {
        let state = self.state.lock().await;
        match state.files.get(path) {
            Some(content) => Ok(content.clone()),
            None => {
                // Distinguish a directory prefix from a missing path.
                if state.files.keys().any(|k| is_under(path, k) && k != path) {
                    Err(PathError::IsDirectory(path.to_string()).into())
                } else {
                    Err(PathError::NotFound(path.to_string()).into())
                }
            }
        }
    }
}

#[async_trait]
impl FileBackend for StateBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, FsError> {
        let dir = normalize(path)?;
        let state = self.state.lock().await;
        if state.files.contains_key(&dir) {
            return Err(PathError::NotDirectory(dir).into());
        }
        let prefix = if dir == "/" { String::new() } else { dir.clone() };
        let mut files: Vec<FileInfo> = Vec::new();
        let mut dirs: BTreeSet<String> = BTreeSet::new();
        let mut seen_any = false;
        for (key, content) in state.files.iter() {
            if !is_under(&dir, key) {
                continue;
            }
            seen_any = true;
            let rest = &key[prefix.len() + 1..];
            match rest.find('/') {
                None => files.push(FileInfo {
                    path: key.clone(),
                    is_dir: false,
                    size: content.len() as u64,
                    modified_at: None,
                }),
                Some(i) => {
                    dirs.insert(format!("{}/{}", prefix, &rest[..i]));
                }
            }
        }
        if !seen_any && dir != "/" {
            return Err(PathError::NotFound(dir).into());
        }
        let mut out: Vec<FileInfo> = dirs
            .into_iter()
            .map(|d| FileInfo {
                path: d,
                is_dir: true,
                size: 0,
                modified_at: None,
            })
            .collect();
        out.extend(files);
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
        let content = self.content_of(&path).await?;
        Ok(slice_bytes(&content, offset, limit))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), FsError> {
        let path = normalize(path)?;
        let mut state = self.state.lock().await;
        state.files.insert(path, content.to_string());
        Ok(())
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<u32, FsError> {
        let path = normalize(path)?;
        let content = self.content_of(&path).await?;
        let (updated, count) = apply_edit(&content, old, new, replace_all)?;
        let mut state = self.state.lock().await;
        state.files.insert(path, updated);
        Ok(count)
    }

    async fn glob(&self, pattern: &str, root: &str) -> Result<Vec<String>, FsError> {
        let root = normalize(root)?;
        let pattern = anchored_pattern(pattern, &root)?;
        let state = self.state.lock().await;
        let mut out: Vec<String> = state
            .files
            .keys()
            .filter(|k| is_under(&root, k) && doublestar_match(&pattern, k))
            .cloned()
            .collect();
        drop(state);
        sort_glob_paths(&mut out);
        Ok(out)
    }

    async fn grep(
        &self,
        pattern: &str,
        root: &str,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>, FsError> {
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
        let state = self.state.lock().await;
        let mut matches = Vec::new();
        for (key, content) in state.files.iter() {
            if !is_under(&root, key) {
                continue;
            }
            if let Some(ref inc) = include {
                if !doublestar_match(inc, key) {
                    continue;
                }
            }
            let hits = structural_grep(content, pattern, &flags)
                .map_err(|e| FsError::InvalidPattern(e.to_string()))?;
            for (line, text) in hits {
                matches.push(GrepMatch {
                    path: key.clone(),
                    line,
                    text,
                });
            }
        }
        drop(state);
        sort_grep_matches(&mut matches);
        if let Some(max) = options.max_hits {
            matches.truncate(max);
        }
        Ok(matches)
    }

    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        let path = normalize(path)?;
        let state = self.state.lock().await;
        Ok(state.files.contains_key(&path)
            || state.files.keys().any(|k| is_under(&path, k)))
    }
}
