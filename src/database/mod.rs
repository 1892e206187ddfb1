//! Storage-engine collaborator
//!
//! The backup engine treats the database as opaque. Everything it needs from
//! the storage layer goes through [`DatabaseEngine`]: a native hot-backup
//! primitive, the engine's self-check, and table presence / row counts.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the storage engine
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The database file does not exist
    #[error("Database file not found: {0}")]
    NotFound(PathBuf),

    /// Table names are interpolated into SQL and must be plain identifiers
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Error reported by SQLite
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Capabilities the backup engine requires from the database layer
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Short engine name used in logs and metadata
    fn name(&self) -> &str;

    /// Connection URL recorded in snapshot metadata
    fn database_url(&self, path: &Path) -> String;

    /// Produce a consistent copy of `source` at `destination` using the
    /// engine's native online backup. `destination` must not exist.
    async fn hot_backup(&self, source: &Path, destination: &Path) -> Result<(), DatabaseError>;

    /// Run the engine self-check. Returns the diagnostic lines; a healthy
    /// database yields exactly `["ok"]`.
    async fn integrity_check(&self, path: &Path) -> Result<Vec<String>, DatabaseError>;

    /// Whether `table` exists in the database at `path`
    async fn table_exists(&self, path: &Path, table: &str) -> Result<bool, DatabaseError>;

    /// Number of rows in `table`
    async fn count_rows(&self, path: &Path, table: &str) -> Result<i64, DatabaseError>;
}

/// SQLite implementation backed by sqlx
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    busy_timeout: Duration,
}

impl SqliteEngine {
    /// Create an engine with the default 30 second busy timeout
    pub fn new() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// How long to wait on a locked database before giving up
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    async fn open(&self, path: &Path) -> Result<SqliteConnection, DatabaseError> {
        if !path.is_file() {
            return Err(DatabaseError::NotFound(path.to_path_buf()));
        }

        let conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .busy_timeout(self.busy_timeout)
            .disable_statement_logging()
            .connect()
            .await?;

        debug!(path = %path.display(), "Opened SQLite connection");
        Ok(conn)
    }
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_identifier(table: &str) -> Result<&str, DatabaseError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(table)
    } else {
        Err(DatabaseError::InvalidTableName(table.to_string()))
    }
}

#[async_trait]
impl DatabaseEngine for SqliteEngine {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn database_url(&self, path: &Path) -> String {
        format!("sqlite:///{}", path.display())
    }

    async fn hot_backup(&self, source: &Path, destination: &Path) -> Result<(), DatabaseError> {
        let mut conn = self.open(source).await?;
        let target = destination.to_string_lossy().into_owned();

        let result = sqlx::query("VACUUM INTO ?1")
            .bind(target)
            .execute(&mut conn)
            .await;
        conn.close().await?;
        result?;

        Ok(())
    }

    async fn integrity_check(&self, path: &Path) -> Result<Vec<String>, DatabaseError> {
        let mut conn = self.open(path).await?;
        let rows: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        Ok(rows)
    }

    async fn table_exists(&self, path: &Path, table: &str) -> Result<bool, DatabaseError> {
        let mut conn = self.open(path).await?;
        let found: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(&mut conn)
        .await?;
        conn.close().await?;
        Ok(found > 0)
    }

    async fn count_rows(&self, path: &Path, table: &str) -> Result<i64, DatabaseError> {
        let table = checked_identifier(table)?;
        let mut conn = self.open(path).await?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(count)
    }
}
