//! SQLite checkpoint. One row per keyword; a re-scanned keyword replaces its
//! payload but keeps its original position in the log.

use crate::{archive_stamp, CheckpointStore};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use trendscout_core::{keyword_key, CheckpointError, KeywordResult};

const TABLE: &str = "checkpoint";

pub struct SqliteCheckpoint {
    pool: SqlitePool,
    known: HashSet<String>,
    pending: Vec<KeywordResult>,
}

impl SqliteCheckpoint {
    /// Opens (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Connects by URL, e.g. `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, CheckpointError> {
        // A single long-lived connection keeps in-memory databases alive and
        // writes strictly ordered.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            known: HashSet::new(),
            pending: Vec::new(),
        };
        store.create_table().await?;
        Ok(store)
    }

    async fn create_table(&self) -> Result<(), CheckpointError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_log(&self) -> Result<Vec<KeywordResult>, CheckpointError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as(&format!("SELECT seq, payload FROM {TABLE} ORDER BY seq"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(seq, payload)| {
                serde_json::from_str(&payload).map_err(|e| CheckpointError::Corrupt {
                    location: format!("{TABLE} row {seq}"),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn row_count(&self) -> Result<i64, CheckpointError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn table_exists(&self, name: &str) -> Result<bool, CheckpointError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn archive_name(&self) -> Result<String, CheckpointError> {
        let base = format!("{TABLE}_{}", archive_stamp());
        let mut name = base.clone();
        let mut n = 1;
        while self.table_exists(&name).await? {
            name = format!("{base}_{n}");
            n += 1;
        }
        Ok(name)
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpoint {
    async fn load_existing(&mut self) -> Result<HashSet<String>, CheckpointError> {
        let records = self.read_log().await?;
        self.known = records.iter().map(KeywordResult::key).collect();
        debug!("Loaded {} checkpoint rows", records.len());
        Ok(self.known.clone())
    }

    fn has(&self, keyword: &str) -> bool {
        self.known.contains(&keyword_key(keyword))
    }

    async fn append(&mut self, result: KeywordResult) -> Result<(), CheckpointError> {
        self.known.insert(result.key());
        self.pending.push(result);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), CheckpointError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let upsert = format!(
            "INSERT INTO {TABLE} (keyword, payload) VALUES (?, ?)
             ON CONFLICT(keyword) DO UPDATE SET payload = excluded.payload"
        );

        let mut tx = self.pool.begin().await?;
        for record in &self.pending {
            let payload = serde_json::to_string(record)?;
            sqlx::query(&upsert)
                .bind(record.key())
                .bind(payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Checkpoint flushed {} rows", self.pending.len());
        self.pending.clear();
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<KeywordResult>, CheckpointError> {
        self.flush().await?;
        self.read_log().await
    }

    async fn archive(&mut self) -> Result<Option<String>, CheckpointError> {
        self.flush().await?;
        if self.row_count().await? == 0 {
            return Ok(None);
        }

        let archived = self.archive_name().await?;
        sqlx::query(&format!("ALTER TABLE {TABLE} RENAME TO {archived}"))
            .execute(&self.pool)
            .await?;
        self.create_table().await?;
        self.known.clear();

        info!("Archived checkpoint table to {}", archived);
        Ok(Some(archived))
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
