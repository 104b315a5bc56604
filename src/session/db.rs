use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::models::Collection;
use super::store::{Document, Filter, Store, matches};
use crate::errors::StoreError;

/// Async-safe SQLite store.
///
/// Wraps `RecordDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<RecordDb>>,
}

impl SqliteStore {
    pub fn new(db: RecordDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        Ok(Self::new(RecordDb::new(path)?))
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::new(RecordDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RecordDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    async fn call_store<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&RecordDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call(f).await.map_err(StoreError::Database)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save(&self, collection: Collection, id: &str, body: Value) -> Result<u64, StoreError> {
        let id = id.to_string();
        let body = serde_json::to_string(&body)?;
        self.call_store(move |db| db.upsert(collection, &id, &body)).await
    }

    async fn save_if_version(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
        expected: u64,
    ) -> Result<Option<u64>, StoreError> {
        let id = id.to_string();
        let body = serde_json::to_string(&body)?;
        self.call_store(move |db| db.compare_and_set(collection, &id, &body, expected))
            .await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let id = id.to_string();
        let row = self.call_store(move |db| db.get(collection, &id)).await?;
        match row {
            Some((body, version)) => Ok(Some(Document {
                body: serde_json::from_str(&body)?,
                version,
            })),
            None => Ok(None),
        }
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let bodies = self.call_store(move |db| db.list(collection)).await?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    async fn query(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        // Equality is evaluated on the decoded JSON so that numbers, strings
        // and nulls compare exactly as they do in `MemoryStore`.
        let docs = self.get_all(collection).await?;
        Ok(docs.into_iter().filter(|doc| matches(doc, filter)).collect())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let owned = id.to_string();
        let removed = self.call_store(move |db| db.delete(collection, &owned)).await?;
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
        }
    }
}

pub struct RecordDb {
    conn: Connection,
}

impl RecordDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        // Other processes (a server and CLI calls) may hold the write lock briefly.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set SQLite busy timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .context("Failed to configure SQLite journal")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS records (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (collection, id)
                );

                CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Record CRUD ───────────────────────────────────────────────────

    pub fn upsert(&self, collection: Collection, id: &str, body: &str) -> Result<u64> {
        let version: i64 = self
            .conn
            .query_row(
                "INSERT INTO records (collection, id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE
                 SET body = excluded.body, version = records.version + 1, updated_at = datetime('now')
                 RETURNING version",
                params![collection.as_str(), id, body],
                |row| row.get(0),
            )
            .context("Failed to upsert record")?;
        Ok(version as u64)
    }

    pub fn compare_and_set(
        &self,
        collection: Collection,
        id: &str,
        body: &str,
        expected: u64,
    ) -> Result<Option<u64>> {
        let version: Option<i64> = if expected == 0 {
            self.conn
                .query_row(
                    "INSERT INTO records (collection, id, body) VALUES (?1, ?2, ?3)
                     ON CONFLICT(collection, id) DO NOTHING
                     RETURNING version",
                    params![collection.as_str(), id, body],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to insert record")?
        } else {
            self.conn
                .query_row(
                    "UPDATE records
                     SET body = ?1, version = version + 1, updated_at = datetime('now')
                     WHERE collection = ?2 AND id = ?3 AND version = ?4
                     RETURNING version",
                    params![body, collection.as_str(), id, expected as i64],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to update record")?
        };
        Ok(version.map(|v| v as u64))
    }

    pub fn get(&self, collection: Collection, id: &str) -> Result<Option<(String, u64)>> {
        self.conn
            .query_row(
                "SELECT body, version FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)),
            )
            .optional()
            .context("Failed to query record")
    }

    pub fn list(&self, collection: Collection) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY rowid")
            .context("Failed to prepare list")?;
        let rows = stmt
            .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))
            .context("Failed to query records")?;
        let mut bodies = Vec::new();
        for row in rows {
            bodies.push(row.context("Failed to read record row")?);
        }
        Ok(bodies)
    }

    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .context("Failed to delete record")?;
        Ok(count > 0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::conformance;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = RecordDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'records'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 1);
        // Re-running is a no-op.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_upsert_bumps_version() -> Result<()> {
        let db = RecordDb::new_in_memory()?;
        assert_eq!(db.upsert(Collection::Sessions, "a", "{}")?, 1);
        assert_eq!(db.upsert(Collection::Sessions, "a", r#"{"x":1}"#)?, 2);
        let (body, version) = db.get(Collection::Sessions, "a")?.unwrap();
        assert_eq!(body, r#"{"x":1}"#);
        assert_eq!(version, 2);
        Ok(())
    }

    #[test]
    fn test_same_id_in_two_collections_is_independent() -> Result<()> {
        let db = RecordDb::new_in_memory()?;
        db.upsert(Collection::Sessions, "s1", r#"{"kind":"session"}"#)?;
        db.upsert(Collection::Investments, "s1", r#"{"kind":"investment"}"#)?;
        assert!(db.delete(Collection::Sessions, "s1")?);
        assert!(db.get(Collection::Sessions, "s1")?.is_none());
        assert!(db.get(Collection::Investments, "s1")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_get() {
        conformance::save_then_get(&SqliteStore::new_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_query_by_equality() {
        conformance::query_by_equality(&SqliteStore::new_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_missing_fails() {
        conformance::delete_missing_fails(&SqliteStore::new_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        conformance::compare_and_set(&SqliteStore::new_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_open_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("arv.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .save(Collection::Sessions, "keep", serde_json::json!({"id": "keep"}))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let doc = store.get(Collection::Sessions, "keep").await.unwrap().unwrap();
        assert_eq!(doc.body["id"], "keep");
    }
}
