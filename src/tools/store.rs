//! Persistent key-value store contract.
//!
//! The store outlives a single run: the store backend keeps files in it and
//! external drivers (Redis, sqlite, ...) implement the same trait. The only
//! consistency promise the harness relies on is read-your-writes through one
//! handle.

use async_trait::async_trait;
use serde_json::Value;

/// Hierarchically-namespaced key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &[&str], key: &str) -> Option<Value>;

    async fn put(&self, namespace: &[&str], key: &str, value: Value);

    async fn delete(&self, namespace: &[&str], key: &str);

    /// All keys in a namespace. Listings are prefix scans; ordering is not
    /// guaranteed by the contract.
    async fn list(&self, namespace: &[&str]) -> Vec<String>;
}

/// In-memory store for defaults and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    data: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(namespace: &[&str], key: &str) -> String {
        if namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", namespace.join(":"), key)
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, namespace: &[&str], key: &str) -> Option<Value> {
        let data = self.data.read().await;
        data.get(&Self::make_key(namespace, key)).cloned()
    }

    async fn put(&self, namespace: &[&str], key: &str, value: Value) {
        let mut data = self.data.write().await;
        data.insert(Self::make_key(namespace, key), value);
    }

    async fn delete(&self, namespace: &[&str], key: &str) {
        let mut data = self.data.write().await;
        data.remove(&Self::make_key(namespace, key));
    }

    async fn list(&self, namespace: &[&str]) -> Vec<String> {
        let prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{}:", namespace.join(":"))
        };
        let data = self.data.read().await;
        data.keys()
            .filter_map(|k| {
                if prefix.is_empty() {
                    Some(k.clone())
                } else {
                    k.strip_prefix(&prefix).map(String::from)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryStore::new();
        store.put(&["fs"], "a.txt", json!("hello")).await;
        assert_eq!(store.get(&["fs"], "a.txt").await, Some(json!("hello")));
        store.delete(&["fs"], "a.txt").await;
        assert_eq!(store.get(&["fs"], "a.txt").await, None);
    }

    #[tokio::test]
    async fn list_scopes_to_namespace() {
        let store = InMemoryStore::new();
        store.put(&["fs"], "a", json!(1)).await;
        store.put(&["fs"], "b", json!(2)).await;
        store.put(&["todos"], "c", json!(3)).await;
        let mut keys = store.list(&["fs"]).await;
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
