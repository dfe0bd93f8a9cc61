use anyhow::Result;
use sqlx::SqlitePool;
use std::future::Future;

use crate::models::PersistedRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable per-item metadata, keyed by the unique item name.
pub trait RecordStore: Send + Sync {
    fn get_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<PersistedRecord, StoreError>> + Send;

    fn insert(&self, record: &PersistedRecord)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update(&self, record: &PersistedRecord)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            votes INTEGER NOT NULL DEFAULT 0,
            genre TEXT NOT NULL DEFAULT '',
            rating REAL NOT NULL DEFAULT 0,
            year INTEGER NOT NULL DEFAULT 0,
            nfotime INTEGER NOT NULL DEFAULT 0,
            firstvideo INTEGER NOT NULL DEFAULT 0,
            lastvideo INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database schema ready");
    Ok(())
}

/// Release unused memory back to the OS
/// Call after a full catalog rebuild
pub async fn shrink_memory(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA shrink_memory").execute(pool).await?;
    tracing::debug!("SQLite memory shrunk");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl RecordStore for SqliteRecordStore {
    async fn get_by_name(&self, name: &str) -> Result<PersistedRecord, StoreError> {
        sqlx::query_as::<_, PersistedRecord>(
            "SELECT id, name, votes, genre, rating, year, nfotime, firstvideo, lastvideo
             FROM items WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn insert(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO items (id, name, votes, genre, rating, year, nfotime, firstvideo, lastvideo)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.votes)
        .bind(&record.genre)
        .bind(record.rating)
        .bind(record.year)
        .bind(record.nfotime)
        .bind(record.firstvideo)
        .bind(record.lastvideo)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE items SET votes = ?, genre = ?, rating = ?, year = ?, nfotime = ?,
                 firstvideo = ?, lastvideo = ?
             WHERE name = ?",
        )
        .bind(record.votes)
        .bind(&record.genre)
        .bind(record.rating)
        .bind(record.year)
        .bind(record.nfotime)
        .bind(record.firstvideo)
        .bind(record.lastvideo)
        .bind(&record.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
