//! Embedded schema for the application database.
//!
//! Schema revisions are compiled into the binary and tracked with
//! SQLite's `user_version` pragma: opening a database applies every
//! revision its recorded version predates, then stamps the new version.
//! There is no separate bookkeeping table.

use sqlx::SqlitePool;
use thiserror::Error;

/// Compiled-in revisions, ascending by number.
const REVISIONS: &[(i32, &str)] = &[(
    1,
    include_str!("../../../migrations/001_initial_schema.sql"),
)];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Could not read schema version: {0}")]
    VersionRead(#[source] sqlx::Error),

    #[error("Schema revision {revision} did not apply: {source}")]
    RevisionFailed {
        revision: i32,
        #[source]
        source: sqlx::Error,
    },
}

/// Bring the database up to the newest compiled-in revision. Returns how
/// many revisions were applied (0 when already current).
pub async fn upgrade(pool: &SqlitePool) -> Result<usize, SchemaError> {
    let current = version(pool).await?;
    let mut applied = 0;

    for (revision, sql) in REVISIONS {
        if *revision <= current {
            continue;
        }

        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .map_err(|source| SchemaError::RevisionFailed {
                revision: *revision,
                source,
            })?;

        // Pragmas cannot take bind parameters; the revision is a literal.
        sqlx::query(&format!("PRAGMA user_version = {revision}"))
            .execute(pool)
            .await
            .map_err(|source| SchemaError::RevisionFailed {
                revision: *revision,
                source,
            })?;

        applied += 1;
    }

    Ok(applied)
}

/// The schema revision recorded in the database; 0 for a fresh file.
pub async fn version(pool: &SqlitePool) -> Result<i32, SchemaError> {
    let (version,): (i32,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(SchemaError::VersionRead)?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::open_memory_pool;

    #[tokio::test]
    async fn test_upgrade_applies_once_then_noops() {
        let pool = open_memory_pool().await.unwrap();
        assert_eq!(version(&pool).await.unwrap(), 0);

        assert_eq!(upgrade(&pool).await.unwrap(), REVISIONS.len());
        assert_eq!(version(&pool).await.unwrap(), 1);

        // Re-running against a current database is a no-op.
        assert_eq!(upgrade(&pool).await.unwrap(), 0);
        assert_eq!(version(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upgraded_schema_has_the_tables() {
        let pool = open_memory_pool().await.unwrap();
        upgrade(&pool).await.unwrap();

        for table in ["agents", "iterations", "knowledge", "strategy_versions", "activity_log"] {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
