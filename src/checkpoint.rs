//! Durable key→value checkpoint storage.
//!
//! Each connector persists its progress under one fixed state key so the
//! next run can resume without re-processing previously seen content. The
//! store is injected into the batch runner rather than reached through a
//! global, so tests can substitute [`MemoryCheckpointStore`].
//!
//! A missing key is `Ok(None)`, never an error: the first run of a
//! connector simply starts from an empty state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::db;

/// State key for the directory connector's processed-file map.
pub const DIRECTORY_STATE_KEY: &str = "directory_connector_state";
/// State key for the live messaging connector's per-channel cursors.
pub const MESSAGING_STATE_KEY: &str = "messaging_connector_state";

/// Durable mapping from a state key to an arbitrary JSON value.
///
/// `store` must be atomic per key: a crash mid-run leaves the previous
/// value intact. Single writer per key is assumed; no locking is done
/// here.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn store(&self, key: &str, value: &Value) -> Result<()>;
}

/// In-memory store for tests.
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// SQLite-backed store. One row per state key, upserted whole.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (creating if missing) the checkpoint database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                state_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT value FROM checkpoints WHERE state_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt checkpoint value for key '{}'", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (state_key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(state_key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_load_missing_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        store
            .store(MESSAGING_STATE_KEY, &json!({"C1": {"name": "general", "initial": true}}))
            .await
            .unwrap();
        let loaded = store.load(MESSAGING_STATE_KEY).await.unwrap().unwrap();
        assert_eq!(loaded["C1"]["name"], "general");
    }

    #[tokio::test]
    async fn sqlite_store_round_trip_and_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(&tmp.path().join("state.sqlite"))
            .await
            .unwrap();

        assert!(store.load(DIRECTORY_STATE_KEY).await.unwrap().is_none());

        store
            .store(DIRECTORY_STATE_KEY, &json!({"/a.txt": true}))
            .await
            .unwrap();
        store
            .store(DIRECTORY_STATE_KEY, &json!({"/a.txt": true, "/b.txt": true}))
            .await
            .unwrap();

        let loaded = store.load(DIRECTORY_STATE_KEY).await.unwrap().unwrap();
        assert_eq!(loaded.as_object().unwrap().len(), 2);
        store.close().await;
    }
}
