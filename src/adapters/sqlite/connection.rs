//! Opening SQLite pools for the application and market stores.
//!
//! Everything here works on filesystem paths. The application database is
//! opened writable in WAL mode (created on first run, parent directories
//! included); the market store is only ever opened read-only; tests get a
//! single-connection in-memory pool.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Cannot prepare directory for {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Open (creating if missing) the application database at `path`.
pub async fn open_pool(path: &Path, max_connections: u32) -> Result<SqlitePool, OpenError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| OpenError::Directory {
                path: path.display().to_string(),
                source,
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .map_err(|source| OpenError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Open an existing database read-only (the historical market store).
/// A missing file is an error here; this side never creates anything.
pub async fn open_read_only_pool(path: &Path) -> Result<SqlitePool, OpenError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|source| OpenError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// In-memory pool for tests. A single connection keeps the database alive
/// for the pool's whole lifetime.
pub async fn open_memory_pool() -> Result<SqlitePool, OpenError> {
    let options = ":memory:"
        .parse::<SqliteConnectOptions>()
        .expect("\":memory:\" is always a valid SQLite connection string")
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|source| OpenError::Open {
            path: ":memory:".to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_pool_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/app.db");

        let pool = open_pool(&path, 2).await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_read_only_pool_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_read_only_pool(&dir.path().join("absent.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpenError::Open { .. }));
    }

    #[tokio::test]
    async fn test_read_only_pool_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");

        let writable = open_pool(&path, 1).await.unwrap();
        sqlx::query("CREATE TABLE bars (x INTEGER)")
            .execute(&writable)
            .await
            .unwrap();
        writable.close().await;

        let read_only = open_read_only_pool(&path).await.unwrap();
        assert!(sqlx::query("INSERT INTO bars (x) VALUES (1)")
            .execute(&read_only)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_memory_pool_round_trips() {
        let pool = open_memory_pool().await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (x) VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();

        let (x,): (i64,) = sqlx::query_as("SELECT x FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(x, 7);
    }
}
