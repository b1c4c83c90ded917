//! SQLite adapters for the quantlab persistence and market-data stores.

pub mod activity_log_repository;
pub mod agent_repository;
pub mod connection;
pub mod iteration_repository;
pub mod knowledge_repository;
pub mod market_data;
pub mod schema;
pub mod strategy_repository;

pub use activity_log_repository::SqliteActivityLog;
pub use agent_repository::SqliteAgentRepository;
pub use connection::{open_memory_pool, open_pool, open_read_only_pool, OpenError};
pub use iteration_repository::SqliteIterationRepository;
pub use knowledge_repository::SqliteKnowledgeRepository;
pub use market_data::SqliteMarketDataStore;
pub use schema::SchemaError;
pub use strategy_repository::SqliteStrategyVersionRepository;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an optional UUID string from a SQLite row field.
pub fn parse_optional_uuid(s: Option<String>) -> DomainResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's
/// default when the column is NULL.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(
    s: Option<String>,
) -> DomainResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|opt| opt.unwrap_or_default())
}

/// Parse an optional JSON column without a default fallback.
pub fn parse_optional_json<T: serde::de::DeserializeOwned>(
    s: Option<String>,
) -> DomainResult<Option<T>> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Open error: {0}")]
    Open(#[from] OpenError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Open (creating if missing) the application database and bring its
/// schema up to the newest compiled-in revision.
pub async fn initialize_database(
    path: impl AsRef<std::path::Path>,
    max_connections: u32,
) -> Result<SqlitePool, DatabaseError> {
    let pool = open_pool(path.as_ref(), max_connections).await?;
    schema::upgrade(&pool).await?;
    Ok(pool)
}

/// In-memory test pool with the full schema applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = open_memory_pool().await?;
    schema::upgrade(&pool).await?;
    Ok(pool)
}
