//! Whole-store JSON document on disk with debounced writes.
//!
//! Mutations only mark the store dirty and arm a single coalescing timer;
//! when it fires the whole document is written to a temp file and renamed
//! into place. Dropping the last handle flushes synchronously. A hard kill
//! can lose at most the writes of one interval.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use super::PersistenceStore;
use crate::error::StorageError;

type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    namespaces: Namespaces,
}

pub struct JsonFileStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    flush_interval: Duration,
    data: RwLock<Namespaces>,
    dirty: AtomicBool,
    timer_armed: AtomicBool,
    /// Serializes writers of the file itself.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, loading it if it exists. The file is created on first flush.
    pub fn open(path: &Path, flush_interval: Duration) -> Result<Self, StorageError> {
        let namespaces = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                Namespaces::new()
            } else {
                let file: StoreFile = serde_json::from_str(&raw)?;
                if file.version > FORMAT_VERSION {
                    return Err(StorageError::Unavailable(format!(
                        "{} was written by a newer format (v{})",
                        path.display(),
                        file.version
                    )));
                }
                file.namespaces
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Namespaces::new()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                flush_interval,
                data: RwLock::new(namespaces),
                dirty: AtomicBool::new(false),
                timer_armed: AtomicBool::new(false),
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether there are writes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        if self.inner.timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.inner);
                let interval = self.inner.flush_interval;
                handle.spawn(async move {
                    tokio::time::sleep(interval).await;
                    flush_from_timer(weak).await;
                });
            }
            Err(_) => {
                self.inner.timer_armed.store(false, Ordering::SeqCst);
                if let Err(e) = self.inner.flush_sync() {
                    tracing::warn!(path = %self.inner.path.display(), "store flush failed: {e}");
                }
            }
        }
    }
}

async fn flush_from_timer(weak: Weak<Inner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    inner.timer_armed.store(false, Ordering::SeqCst);
    let path = inner.path.clone();
    match tokio::task::spawn_blocking(move || inner.flush_sync()).await {
        Ok(Ok(())) => tracing::debug!(path = %path.display(), "debounced store flush"),
        Ok(Err(e)) => tracing::warn!(path = %path.display(), "debounced store flush failed: {e}"),
        Err(e) => tracing::warn!(path = %path.display(), "store flush task failed: {e}"),
    }
}

impl Inner {
    fn flush_sync(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.write_snapshot();
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    fn write_snapshot(&self) -> Result<(), StorageError> {
        let json = {
            let data = self.data.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_vec_pretty(&StoreFileRef {
                version: FORMAT_VERSION,
                namespaces: &*data,
            })?
        };

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    namespaces: &'a Namespaces,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.dirty.load(Ordering::SeqCst) {
            if let Err(e) = self.flush_sync() {
                tracing::warn!(path = %self.path.display(), "final store flush failed: {e}");
            }
        }
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            data.entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
        }
        self.mark_dirty();
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let removed = {
            let mut data = self.inner.data.write().unwrap_or_else(|e| e.into_inner());
            data.get_mut(namespace)
                .map(|ns| ns.remove(key).is_some())
                .unwrap_or(false)
        };
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    async fn count(&self, namespace: &str) -> Result<usize, StorageError> {
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(namespace).map(BTreeMap::len).unwrap_or(0))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let data = self.inner.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.flush_sync())
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_contract() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(&dir.path().join("kb.json"), Duration::from_secs(60)).unwrap();
        crate::store::tests::check_contract(&store).await;
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_debounced_writes_coalesce_and_land() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("kb.json");
        let store = JsonFileStore::open(&path, Duration::from_millis(20)).unwrap();

        for i in 0..10 {
            store
                .set("patterns", &format!("site{i}.com"), json!({ "n": i }))
                .await
                .unwrap();
        }
        assert!(store.is_dirty());
        assert!(!path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.is_dirty());

        let reopened = JsonFileStore::open(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(reopened.count("patterns").await.unwrap(), 10);
        assert_eq!(
            reopened.get("patterns", "site7.com").await.unwrap(),
            Some(json!({ "n": 7 }))
        );
    }

    #[tokio::test]
    async fn test_drop_flushes_pending_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        {
            let store = JsonFileStore::open(&path, Duration::from_secs(3600)).unwrap();
            store.set("patterns", "example.com", json!(1)).await.unwrap();
            assert!(store.is_dirty());
        }
        let reopened = JsonFileStore::open(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(reopened.get("patterns", "example.com").await.unwrap(), Some(json!(1)));
        assert!(!dir.path().join("kb.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::open(&path, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, StorageError::Json(_)));
    }

    #[test]
    fn test_writes_without_runtime_flush_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let store = JsonFileStore::open(&path, Duration::from_secs(3600)).unwrap();
        futures::executor::block_on(store.set("ns", "k", json!("v"))).unwrap();
        assert!(path.exists());
        assert!(!store.is_dirty());
    }
}
