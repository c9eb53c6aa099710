//! In-process store. Nothing survives the process.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::PersistenceStore;
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.namespaces.read().await;
        Ok(guard.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let mut guard = self.namespaces.write().await;
        guard
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let mut guard = self.namespaces.write().await;
        Ok(guard
            .get_mut(namespace)
            .map(|ns| ns.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn count(&self, namespace: &str) -> Result<usize, StorageError> {
        let guard = self.namespaces.read().await;
        Ok(guard.get(namespace).map(BTreeMap::len).unwrap_or(0))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let guard = self.namespaces.read().await;
        Ok(guard
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}
