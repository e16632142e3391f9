//! SQLite storage for collections and their embedded records.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE collections (
//!     name TEXT PRIMARY KEY,
//!     dimension INTEGER NOT NULL,          -- fixed when the collection is created
//!     embedding_provider TEXT NOT NULL,
//!     created_at INTEGER NOT NULL          -- unix seconds
//! );
//!
//! CREATE TABLE records (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
//!     content TEXT NOT NULL,
//!     metadata TEXT NOT NULL,              -- JSON object
//!     embedding BLOB NOT NULL              -- f16 vector
//! );
//! ```
//!
//! The connection uses WAL journaling, a 5 second busy timeout, foreign keys
//! and a 64KB page size suited to embedding blobs.

use super::{CollectionInfo, RecordId, StoredRecord};
use anyhow::{Context, Result, bail};
use half::f16;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

/// File name of the index database inside a persist directory.
pub const INDEX_FILE_NAME: &str = "docqa-index.sqlite3";

/// Handle on the index database of one persist directory.
#[derive(Clone, Debug)]
pub struct CollectionIndex {
    base: PathBuf,
    pool: SqlitePool,
}

impl CollectionIndex {
    pub fn database_path(base: &Path) -> PathBuf {
        base.join(INDEX_FILE_NAME)
    }

    fn connect_options(base: &Path, create: bool) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(Self::database_path(base))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(create)
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
            .page_size(1 << 16)
            .optimize_on_close(true, 1 << 10)
    }

    /// Open the index in `base`, creating the directory and database as needed.
    pub async fn open(base: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base)
            .await
            .with_context(|| format!("creating {}", base.display()))?;
        let pool = SqlitePool::connect_with(Self::connect_options(base, true)).await?;
        Self::new_with_pool(base, pool).await
    }

    /// Open an existing index without creating anything; `None` if there is none.
    pub async fn open_existing(base: &Path) -> Result<Option<Self>> {
        if !tokio::fs::try_exists(Self::database_path(base)).await? {
            return Ok(None);
        }
        let pool = SqlitePool::connect_with(Self::connect_options(base, false)).await?;
        Ok(Some(Self::new_with_pool(base, pool).await?))
    }

    /// In-memory index for tests.
    pub async fn open_memory(base: &Path) -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(base, pool).await
    }

    async fn new_with_pool(base: &Path, pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            base: base.to_path_buf(),
            pool,
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                embedding_provider TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create `name` if missing and return its info. An existing collection keeps its dimension.
    pub async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        embedding_provider: &str,
    ) -> Result<CollectionInfo> {
        sqlx::query(
            r#"
            INSERT INTO collections (name, dimension, embedding_provider, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(dimension as i64)
        .bind(embedding_provider)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.collection_info(name)
            .await?
            .with_context(|| format!("collection '{name}' vanished after creation"))
    }

    pub async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            r#"
            SELECT c.name, c.dimension, c.embedding_provider, c.created_at,
                   (SELECT COUNT(*) FROM records r WHERE r.collection = c.name) AS record_count
            FROM collections c WHERE c.name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let created_at: i64 = row.get("created_at");
            Ok(CollectionInfo {
                name: row.get("name"),
                dimension: row.get::<i64, _>("dimension") as usize,
                embedding_provider: row.get("embedding_provider"),
                record_count: row.get::<i64, _>("record_count") as usize,
                created_at: chrono::DateTime::from_timestamp(created_at, 0)
                    .context("invalid created_at timestamp")?,
            })
        })
        .transpose()
    }

    pub async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Insert records in a single transaction and return their IDs.
    pub async fn insert_records(
        &self,
        collection: &str,
        records: &[StoredRecord],
    ) -> Result<Vec<RecordId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let metadata = serde_json::to_string(&record.metadata)?;
            let result = sqlx::query(
                r#"
                INSERT INTO records (collection, content, metadata, embedding)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(collection)
            .bind(&record.content)
            .bind(metadata)
            .bind(bytemuck::cast_slice::<f16, u8>(&record.embedding))
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// All records of a collection in insertion order.
    pub async fn records(&self, collection: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, embedding FROM records WHERE collection = ?1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// The first `limit` records of a collection.
    pub async fn peek(&self, collection: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, embedding FROM records WHERE collection = ?1 ORDER BY id LIMIT ?2",
        )
        .bind(collection)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Remove a collection and its records. Returns whether it existed.
    pub async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records WHERE collection = ?1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM collections WHERE name = ?1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close every pooled connection, releasing the database files.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    let metadata_json: String = row.get("metadata");
    let metadata: Map<String, Value> =
        serde_json::from_str(&metadata_json).context("decoding record metadata")?;
    let bytes: Vec<u8> = row.get("embedding");
    if bytes.len() % std::mem::size_of::<f16>() != 0 {
        bail!("embedding blob has odd length {}", bytes.len());
    }
    let mut embedding = vec![f16::ZERO; bytes.len() / std::mem::size_of::<f16>()];
    bytemuck::cast_slice_mut::<f16, u8>(&mut embedding).copy_from_slice(&bytes);

    Ok(StoredRecord {
        id: Some(row.get("id")),
        content: row.get("content"),
        metadata,
        embedding,
    })
}
