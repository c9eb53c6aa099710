//! Namespaced key-value persistence.
//!
//! The knowledge base only talks to [`PersistenceStore`]; which backend sits
//! behind it (memory, a JSON document, SQLite) is a composition-root choice.

pub mod json_file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Namespaced key-value contract.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError>;

    /// Returns whether a value was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;

    async fn has(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    async fn count(&self, namespace: &str) -> Result<usize, StorageError>;

    /// Keys in `namespace`, sorted.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Persist any buffered writes. A no-op for write-through backends.
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Open a file-backed store, picking the backend from the extension:
/// `.db`/`.sqlite`/`.sqlite3` use SQLite, anything else a JSON document.
pub fn open_store(
    path: &Path,
    flush_interval: Duration,
) -> Result<Arc<dyn PersistenceStore>, StorageError> {
    let is_sqlite = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "db" | "sqlite" | "sqlite3"))
        .unwrap_or(false);

    if is_sqlite {
        tracing::debug!(path = %path.display(), "opening sqlite store");
        Ok(Arc::new(SqliteStore::open(path)?))
    } else {
        tracing::debug!(path = %path.display(), "opening json store");
        Ok(Arc::new(JsonFileStore::open(path, flush_interval)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Exercise the shared contract against any backend.
    pub(crate) async fn check_contract(store: &dyn PersistenceStore) {
        assert_eq!(store.get("patterns", "example.com").await.unwrap(), None);
        assert!(!store.has("patterns", "example.com").await.unwrap());

        store
            .set("patterns", "example.com", json!({"version": 1}))
            .await
            .unwrap();
        store.set("patterns", "b.org", json!([1, 2])).await.unwrap();
        store.set("other", "example.com", json!("x")).await.unwrap();

        assert_eq!(
            store.get("patterns", "example.com").await.unwrap(),
            Some(json!({"version": 1}))
        );
        assert!(store.has("patterns", "b.org").await.unwrap());
        assert_eq!(store.count("patterns").await.unwrap(), 2);
        assert_eq!(
            store.keys("patterns").await.unwrap(),
            vec!["b.org".to_string(), "example.com".to_string()]
        );

        store
            .set("patterns", "example.com", json!({"version": 2}))
            .await
            .unwrap();
        assert_eq!(store.count("patterns").await.unwrap(), 2);
        assert_eq!(
            store.get("patterns", "example.com").await.unwrap(),
            Some(json!({"version": 2}))
        );

        assert!(store.delete("patterns", "b.org").await.unwrap());
        assert!(!store.delete("patterns", "b.org").await.unwrap());
        assert_eq!(store.count("patterns").await.unwrap(), 1);
        assert_eq!(store.count("missing").await.unwrap(), 0);
        store.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_store_picks_backend_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();

        let sqlite = open_store(&dir.path().join("kb.db"), Duration::from_millis(10)).unwrap();
        check_contract(sqlite.as_ref()).await;
        assert!(dir.path().join("kb.db").exists());

        let json = open_store(&dir.path().join("kb.json"), Duration::from_millis(10)).unwrap();
        check_contract(json.as_ref()).await;
        assert!(dir.path().join("kb.json").exists());
    }
}
