//! SQLite implementation of the append-only activity log.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ActivityEvent;
use crate::domain::ports::ActivityLog;

#[derive(Clone)]
pub struct SqliteActivityLog {
    pool: SqlitePool,
}

impl SqliteActivityLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLog for SqliteActivityLog {
    async fn record(&self, event: &ActivityEvent) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO activity_log (id, agent_id, event_type, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.agent_id.to_string())
        .bind(&event.event_type)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_agent(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<ActivityEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM activity_log WHERE agent_id = ? ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(agent_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    agent_id: String,
    event_type: String,
    payload: String,
    created_at: String,
}

impl TryFrom<EventRow> for ActivityEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(ActivityEvent {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            event_type: row.event_type,
            payload: serde_json::from_str(&row.payload)?,
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
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_list() {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let agent = Agent::new("log", "x", Personality::default());
        agents.create(&agent).await.unwrap();

        let log = SqliteActivityLog::new(pool);
        log.record(&ActivityEvent::new(
            agent.id,
            "graduated",
            json!({"graduated_forced": true}),
        ))
        .await
        .unwrap();

        let events = log.list_for_agent(agent.id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "graduated");
        assert_eq!(events[0].payload["graduated_forced"], json!(true));
    }
}
