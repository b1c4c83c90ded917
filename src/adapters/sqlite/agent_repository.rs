//! SQLite implementation of the AgentRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus, Personality, RiskTolerance, TradingStyle};
use crate::domain::ports::AgentRepository;

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn create(&self, agent: &Agent) -> DomainResult<Agent> {
        let pattern_focus = serde_json::to_string(&agent.personality.pattern_focus)?;
        let market_conditions = serde_json::to_string(&agent.personality.market_conditions)?;

        let mut tx = self.pool.begin().await?;

        let (next_seq,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(display_seq), 0) + 1 FROM agents")
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"INSERT INTO agents (id, name, instructions, risk_tolerance, trading_style,
               pattern_focus, market_conditions, discovery_mode, status, status_before_pause,
               is_active, display_seq, consecutive_failures, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.instructions)
        .bind(agent.personality.risk_tolerance.as_str())
        .bind(agent.personality.trading_style.as_str())
        .bind(&pattern_focus)
        .bind(&market_conditions)
        .bind(i32::from(agent.discovery_mode))
        .bind(agent.status.as_str())
        .bind(agent.status_before_pause.map(|s| s.as_str()))
        .bind(i32::from(agent.is_active))
        .bind(next_seq)
        .bind(agent.consecutive_failures as i64)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut stored = agent.clone();
        stored.display_seq = next_seq;
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn update(&self, agent: &Agent) -> DomainResult<()> {
        let pattern_focus = serde_json::to_string(&agent.personality.pattern_focus)?;
        let market_conditions = serde_json::to_string(&agent.personality.market_conditions)?;

        let result = sqlx::query(
            r#"UPDATE agents SET name = ?, instructions = ?, risk_tolerance = ?,
               trading_style = ?, pattern_focus = ?, market_conditions = ?,
               discovery_mode = ?, status = ?, status_before_pause = ?, is_active = ?,
               consecutive_failures = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&agent.name)
        .bind(&agent.instructions)
        .bind(agent.personality.risk_tolerance.as_str())
        .bind(agent.personality.trading_style.as_str())
        .bind(&pattern_focus)
        .bind(&market_conditions)
        .bind(i32::from(agent.discovery_mode))
        .bind(agent.status.as_str())
        .bind(agent.status_before_pause.map(|s| s.as_str()))
        .bind(i32::from(agent.is_active))
        .bind(agent.consecutive_failures as i64)
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent.id));
        }

        Ok(())
    }

    async fn list(&self, status: Option<AgentStatus>) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM agents WHERE status = ? ORDER BY display_seq")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM agents ORDER BY display_seq")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(id));
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    name: String,
    instructions: String,
    risk_tolerance: String,
    trading_style: String,
    pattern_focus: Option<String>,
    market_conditions: Option<String>,
    discovery_mode: i32,
    status: String,
    status_before_pause: Option<String>,
    is_active: i32,
    display_seq: i64,
    consecutive_failures: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let id = super::parse_uuid(&row.id)?;

        let risk_tolerance = RiskTolerance::parse_str(&row.risk_tolerance).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid risk tolerance: {}", row.risk_tolerance))
        })?;
        let trading_style = TradingStyle::parse_str(&row.trading_style).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid trading style: {}", row.trading_style))
        })?;
        let status = AgentStatus::parse_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid status: {}", row.status))
        })?;
        let status_before_pause = row
            .status_before_pause
            .as_deref()
            .map(|s| {
                AgentStatus::parse_str(s).ok_or_else(|| {
                    DomainError::SerializationError(format!("Invalid prior status: {s}"))
                })
            })
            .transpose()?;

        Ok(Agent {
            id,
            name: row.name,
            instructions: row.instructions,
            personality: Personality {
                risk_tolerance,
                trading_style,
                pattern_focus: super::parse_json_or_default(row.pattern_focus)?,
                market_conditions: super::parse_json_or_default(row.market_conditions)?,
            },
            discovery_mode: row.discovery_mode != 0,
            status,
            status_before_pause,
            is_active: row.is_active != 0,
            display_seq: row.display_seq,
            consecutive_failures: row.consecutive_failures as u32,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_repo() -> SqliteAgentRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAgentRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup_test_repo().await;

        let agent = Agent::new("vwap-hunter", "Find VWAP bounces", Personality::default());
        let stored = repo.create(&agent).await.unwrap();
        assert_eq!(stored.display_seq, 1);

        let fetched = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "vwap-hunter");
        assert_eq!(fetched.status, AgentStatus::Learning);
    }

    #[tokio::test]
    async fn test_display_seq_is_monotonic() {
        let repo = setup_test_repo().await;

        let first = repo
            .create(&Agent::new("a", "x", Personality::default()))
            .await
            .unwrap();
        let second = repo
            .create(&Agent::new("b", "y", Personality::default()))
            .await
            .unwrap();
        assert_eq!(first.display_seq, 1);
        assert_eq!(second.display_seq, 2);
    }

    #[tokio::test]
    async fn test_update_round_trips_pause_state() {
        let repo = setup_test_repo().await;

        let mut agent = Agent::new("a", "x", Personality::default());
        repo.create(&agent).await.unwrap();

        agent.transition_to(AgentStatus::Paused).unwrap();
        repo.update(&agent).await.unwrap();

        let fetched = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Paused);
        assert_eq!(fetched.status_before_pause, Some(AgentStatus::Learning));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let repo = setup_test_repo().await;

        let mut paused = Agent::new("p", "x", Personality::default());
        paused.transition_to(AgentStatus::Paused).unwrap();
        repo.create(&paused).await.unwrap();
        repo.create(&Agent::new("l", "y", Personality::default()))
            .await
            .unwrap();

        let learning = repo.list(Some(AgentStatus::Learning)).await.unwrap();
        assert_eq!(learning.len(), 1);
        assert_eq!(learning[0].name, "l");

        let all = repo.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_owned_rows() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteAgentRepository::new(pool.clone());

        let agent = Agent::new("doomed", "x", Personality::default());
        repo.create(&agent).await.unwrap();

        let iterations =
            crate::adapters::sqlite::SqliteIterationRepository::new(pool.clone());
        iterations
            .create(&crate::domain::models::Iteration::open(agent.id, 1))
            .await
            .unwrap();
        let knowledge = crate::adapters::sqlite::SqliteKnowledgeRepository::new(pool.clone());
        knowledge
            .insert(&crate::domain::models::KnowledgeEntry::new(
                agent.id,
                crate::domain::models::KnowledgeKind::Insight,
                "lesson",
                0.6,
                1,
            ))
            .await
            .unwrap();

        repo.delete(agent.id).await.unwrap();

        use crate::domain::ports::{IterationRepository, KnowledgeRepository};
        assert!(iterations
            .list_for_agent(agent.id, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(knowledge.list_for_agent(agent.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_agent_errors() {
        let repo = setup_test_repo().await;
        let agent = Agent::new("ghost", "x", Personality::default());
        let err = repo.update(&agent).await.unwrap_err();
        assert!(matches!(err, DomainError::AgentNotFound(_)));
    }
}
