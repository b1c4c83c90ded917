//! SQLite implementation of the StrategyVersionRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::StrategyVersion;
use crate::domain::ports::StrategyVersionRepository;

#[derive(Clone)]
pub struct SqliteStrategyVersionRepository {
    pool: SqlitePool,
}

impl SqliteStrategyVersionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyVersionRepository for SqliteStrategyVersionRepository {
    async fn insert_as_current(&self, version: &StrategyVersion) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE strategy_versions SET is_current = 0 WHERE agent_id = ?")
            .bind(version.agent_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO strategy_versions (id, agent_id, version, scan_source, executor_source,
               win_rate, sharpe_ratio, total_return, winning_template, is_current,
               parent_version_id, change_summary, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)"#,
        )
        .bind(version.id.to_string())
        .bind(version.agent_id.to_string())
        .bind(&version.version)
        .bind(&version.scan_source)
        .bind(&version.executor_source)
        .bind(version.win_rate)
        .bind(version.sharpe_ratio)
        .bind(version.total_return)
        .bind(&version.winning_template)
        .bind(version.parent_version_id.map(|id| id.to_string()))
        .bind(&version.change_summary)
        .bind(version.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn current_for_agent(&self, agent_id: Uuid) -> DomainResult<Option<StrategyVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(
            "SELECT * FROM strategy_versions WHERE agent_id = ? AND is_current = 1",
        )
        .bind(agent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn list_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<StrategyVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            "SELECT * FROM strategy_versions WHERE agent_id = ? ORDER BY created_at DESC",
        )
        .bind(agent_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    agent_id: String,
    version: String,
    scan_source: String,
    executor_source: Option<String>,
    win_rate: f64,
    sharpe_ratio: f64,
    total_return: f64,
    winning_template: String,
    is_current: i32,
    parent_version_id: Option<String>,
    change_summary: String,
    created_at: String,
}

impl TryFrom<VersionRow> for StrategyVersion {
    type Error = DomainError;

    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(StrategyVersion {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            version: row.version,
            scan_source: row.scan_source,
            executor_source: row.executor_source,
            win_rate: row.win_rate,
            sharpe_ratio: row.sharpe_ratio,
            total_return: row.total_return,
            winning_template: row.winning_template,
            is_current: row.is_current != 0,
            parent_version_id: super::parse_optional_uuid(row.parent_version_id)?,
            change_summary: row.change_summary,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository};
    use crate::domain::models::{Agent, Personality};
    use crate::domain::ports::AgentRepository;

    async fn setup() -> (SqliteStrategyVersionRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let agent = Agent::new("v", "x", Personality::default());
        agents.create(&agent).await.unwrap();
        (SqliteStrategyVersionRepository::new(pool), agent.id)
    }

    #[tokio::test]
    async fn test_exactly_one_current_after_promotions() {
        let (repo, agent_id) = setup().await;

        let first = StrategyVersion::new(agent_id, "1.0.0", "scan v1");
        repo.insert_as_current(&first).await.unwrap();

        let mut second = StrategyVersion::new(agent_id, "1.1.0", "scan v2");
        second.parent_version_id = Some(first.id);
        repo.insert_as_current(&second).await.unwrap();

        let all = repo.list_for_agent(agent_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|v| v.is_current).count(), 1);

        let current = repo.current_for_agent(agent_id).await.unwrap().unwrap();
        assert_eq!(current.version, "1.1.0");
        assert_eq!(current.parent_version_id, Some(first.id));
    }
}
