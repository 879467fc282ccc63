//! SQLite connection pool shared by every table of a vault.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

const FILE_POOL_SIZE: u32 = 5;

/// Pool over the vault database, migrated on open.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database file at `path`, creating it and its directory when
    /// missing.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = Self::connect(options, FILE_POOL_SIZE).await?;
        tracing::debug!(path = %path.display(), "opened vault database");
        Ok(db)
    }

    /// Every `:memory:` connection is its own database, so the pool is
    /// capped at one.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().filename(":memory:"), 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let options = options
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}
