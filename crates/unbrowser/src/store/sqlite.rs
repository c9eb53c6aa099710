//! SQLite-backed store. Every call runs on the blocking pool against one
//! shared connection; upserts are single statements so a write either lands
//! completely or not at all.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::PersistenceStore;
use crate::error::StorageError;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            op(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.run(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                    params![ns, k],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                    StorageError::Corrupt {
                        namespace: ns,
                        key: k,
                        reason: e.to_string(),
                    }
                }),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        let text = serde_json::to_string(&value)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at)
                 VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
                params![ns, k, text],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![ns, k],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn has(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let (ns, k) = (namespace.to_string(), key.to_string());
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM kv WHERE namespace = ?1 AND key = ?2",
                    params![ns, k],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn count(&self, namespace: &str) -> Result<usize, StorageError> {
        let ns = namespace.to_string();
        self.run(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv WHERE namespace = ?1",
                params![ns],
                |row| row.get(0),
            )?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let ns = namespace.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
            let rows = stmt.query_map(params![ns], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
        .await
    }
}
