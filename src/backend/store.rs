//! Store backend: file contents in a persistent key-value store.
//!
//! Files are keyed by their normalized absolute path inside one namespace,
//! so content survives across runs sharing a store. Listings are prefix
//! scans; the only consistency promised is read-your-writes through this
//! handle.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::edits::{apply_edit, structural_grep, GrepFlags};
use super::paths::{anchored_pattern, doublestar_match, is_under, normalize};
use super::{
    slice_bytes, sort_glob_paths, sort_grep_matches, FileBackend, FileInfo, GrepMatch, GrepOptions,
};
use crate::error::{FsError, PathError};
use crate::tools::KeyValueStore;

/// Backend over a [KeyValueStore] namespace.
pub struct StoreBackend {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl StoreBackend {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn ns(&self) -> [&str; 1] {
        [self.namespace.as_str()]
    }

    async fn keys(&self) -> Vec<String> {
        self.store.list(&self.ns()).await
    }

    async fn content_of(&self, path: &str) -> Result<String, FsError> {
        match self.store.get(&self.ns(), path).await {
            Some(Value::String(content)) => Ok(content),
            Some(other) => Ok(other.to_string()),
            None => {
                let keys = self.keys().await;
                if keys.iter().any(|k| is_under(path, k) && k != path) {
                    Err(PathError::IsDirectory(path.to_string()).into())
                } else {
                    Err(PathError::NotFound(path.to_string()).into())
                }
            }
        }
    }
}

#[async_trait]
impl FileBackend for StoreBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, FsError> {
        let dir = normalize(path)?;
        let keys = self.keys().await;
        if keys.contains(&dir) {
            return Err(PathError::NotDirectory(dir).into());
        }
        let prefix = if dir == "/" { String::new() } else { dir.clone() };
        let mut dirs: BTreeSet<String> = BTreeSet::new();
        let mut files: Vec<String> = Vec::new();
        let mut seen_any = false;
        for key in &keys {
            if !is_under(&dir, key) {
                continue;
            }
            seen_any = true;
            let rest = &key[prefix.len() + 1..];
            match rest.find('/') {
                None => files.push(key.clone()),
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
        for key in files {
            let size = self
                .store
                .get(&self.ns(), &key)
                .await
                .and_then(|v| v.as_str().map(|s| s.len() as u64))
                .unwrap_or(0);
            out.push(FileInfo {
                path: key,
                is_dir: false,
                size,
                modified_at: None,
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
        let path = normalize(path)?;
        let content = self.content_of(&path).await?;
        Ok(slice_bytes(&content, offset, limit))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), FsError> {
        let path = normalize(path)?;
        self.store
            .put(&self.ns(), &path, Value::String(content.to_string()))
            .await;
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
        self.store
            .put(&self.ns(), &path, Value::String(updated))
            .await;
        Ok(count)
    }

    async fn glob(&self, pattern: &str, root: &str) -> Result<Vec<String>, FsError> {
        let root = normalize(root)?;
        let pattern = anchored_pattern(pattern, &root)?;
        let mut out: Vec<String> = self
            .keys()
            .await
            .into_iter()
            .filter(|k| is_under(&root, k) && doublestar_match(&pattern, k))
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
        let mut matches = Vec::new();
        for key in self.keys().await {
            if !is_under(&root, &key) {
                continue;
            }
            if let Some(ref inc) = include {
                if !doublestar_match(inc, &key) {
                    continue;
                }
            }
            let content = match self.store.get(&self.ns(), &key).await {
                Some(Value::String(c)) => c,
                _ => continue,
            };
            let hits = structural_grep(&content, pattern, &flags)
                .map_err(|e| FsError::InvalidPattern(e.to_string()))?;
            for (line, text) in hits {
                matches.push(GrepMatch {
                    path: key.clone(),
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
        let path = normalize(path)?;
        if self.store.get(&self.ns(), &path).await.is_some() {
            return Ok(true);
        }
        Ok(self.keys().await.iter().any(|k| is_under(&path, k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InMemoryStore;

    fn backend() -> StoreBackend {
        StoreBackend::new(Arc::new(InMemoryStore::new()), "memories")
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let b = backend();
        b.write("/notes/today.md", "remember this").await.unwrap();
        assert_eq!(
            b.read("/notes/today.md", 0, None).await.unwrap(),
            "remember this"
        );
    }

    #[tokio::test]
    async fn shared_store_is_read_your_writes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let first = StoreBackend::new(Arc::clone(&store), "memories");
        first.write("/u.txt", "persisted").await.unwrap();
        drop(first);
        // a later run over the same store sees the write
        let second = StoreBackend::new(store, "memories");
        assert_eq!(second.read("/u.txt", 0, None).await.unwrap(), "persisted");
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let a = StoreBackend::new(Arc::clone(&store), "a");
        let other = StoreBackend::new(store, "b");
        a.write("/f.txt", "x").await.unwrap();
        let err = other.read("/f.txt", 0, None).await.unwrap_err();
        assert!(matches!(err, FsError::Path(PathError::NotFound(_))));
    }

    #[tokio::test]
    async fn ls_info_simulates_directories_from_prefixes() {
        let b = backend();
        b.write("/m/a.txt", "1").await.unwrap();
        b.write("/m/sub/b.txt", "2").await.unwrap();
        let entries = b.ls_info("/m").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["/m/a.txt", "/m/sub"]);
        assert!(entries[1].is_dir);
    }

    #[tokio::test]
    async fn glob_and_grep_over_store_keys() {
        let b = backend();
        b.write("/m/a.rs", "fn main() {}").await.unwrap();
        b.write("/m/b.txt", "fn not rust").await.unwrap();
        let paths = b.glob("**/*.rs", "/").await.unwrap();
        assert_eq!(paths, vec!["/m/a.rs"]);
        let hits = b.grep("fn", "/m", &GrepOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "/m/a.rs");
    }
}
