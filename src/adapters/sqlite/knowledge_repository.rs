//! SQLite implementation of the KnowledgeRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{KnowledgeEntry, KnowledgeKind};
use crate::domain::ports::KnowledgeRepository;

#[derive(Clone)]
pub struct SqliteKnowledgeRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn insert(&self, entry: &KnowledgeEntry) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO knowledge (id, agent_id, kind, pattern_tag, insight, supporting_data,
               confidence, learned_from_iteration, times_validated, last_validated_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.agent_id.to_string())
        .bind(entry.kind.as_str())
        .bind(&entry.pattern_tag)
        .bind(&entry.insight)
        .bind(
            entry
                .supporting_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(entry.confidence)
        .bind(entry.learned_from_iteration)
        .bind(entry.times_validated)
        .bind(entry.last_validated_at.map(|t| t.to_rfc3339()))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, entry: &KnowledgeEntry) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE knowledge SET pattern_tag = ?, insight = ?, supporting_data = ?,
               confidence = ?, times_validated = ?, last_validated_at = ?
               WHERE id = ?"#,
        )
        .bind(&entry.pattern_tag)
        .bind(&entry.insight)
        .bind(
            entry
                .supporting_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(entry.confidence)
        .bind(entry.times_validated)
        .bind(entry.last_validated_at.map(|t| t.to_rfc3339()))
        .bind(entry.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PersistenceFailed(format!(
                "knowledge entry {} not found",
                entry.id
            )));
        }

        Ok(())
    }

    async fn list_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<KnowledgeEntry>> {
        let rows: Vec<KnowledgeRow> =
            sqlx::query_as("SELECT * FROM knowledge WHERE agent_id = ? ORDER BY created_at")
                .bind(agent_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn list_filtered(
        &self,
        agent_id: Uuid,
        kind: Option<KnowledgeKind>,
        pattern_tag: Option<String>,
    ) -> DomainResult<Vec<KnowledgeEntry>> {
        let mut sql = String::from("SELECT * FROM knowledge WHERE agent_id = ?");
        let mut bindings: Vec<String> = vec![agent_id.to_string()];

        if let Some(kind) = kind {
            sql.push_str(" AND kind = ?");
            bindings.push(kind.as_str().to_string());
        }
        if let Some(tag) = pattern_tag {
            sql.push_str(" AND pattern_tag = ?");
            bindings.push(tag);
        }
        sql.push_str(" ORDER BY confidence DESC, times_validated DESC");

        let mut query = sqlx::query_as::<_, KnowledgeRow>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }

        let rows: Vec<KnowledgeRow> = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn top_for_prompt(
        &self,
        agent_id: Uuid,
        limit: i64,
    ) -> DomainResult<Vec<KnowledgeEntry>> {
        let rows: Vec<KnowledgeRow> = sqlx::query_as(
            r#"SELECT * FROM knowledge WHERE agent_id = ?
               ORDER BY confidence DESC, times_validated DESC, learned_from_iteration ASC, id ASC
               LIMIT ?"#,
        )
        .bind(agent_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn count_confident_since(
        &self,
        agent_id: Uuid,
        min_iteration: i64,
        min_confidence: f64,
    ) -> DomainResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM knowledge
               WHERE agent_id = ? AND learned_from_iteration >= ? AND confidence >= ?"#,
        )
        .bind(agent_id.to_string())
        .bind(min_iteration)
        .bind(min_confidence)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeRow {
    id: String,
    agent_id: String,
    kind: String,
    pattern_tag: Option<String>,
    insight: String,
    supporting_data: Option<String>,
    confidence: f64,
    learned_from_iteration: i64,
    times_validated: i64,
    last_validated_at: Option<String>,
    created_at: String,
}

impl TryFrom<KnowledgeRow> for KnowledgeEntry {
    type Error = DomainError;

    fn try_from(row: KnowledgeRow) -> Result<Self, Self::Error> {
        let kind = KnowledgeKind::parse_str(&row.kind).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid knowledge kind: {}", row.kind))
        })?;

        Ok(KnowledgeEntry {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            kind,
            pattern_tag: row.pattern_tag,
            insight: row.insight,
            supporting_data: super::parse_optional_json(row.supporting_data)?,
            confidence: row.confidence,
            learned_from_iteration: row.learned_from_iteration,
            times_validated: row.times_validated,
            last_validated_at: super::parse_optional_datetime(row.last_validated_at)?,
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

    async fn setup() -> (SqliteKnowledgeRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let agent = Agent::new("k", "x", Personality::default());
        agents.create(&agent).await.unwrap();
        (SqliteKnowledgeRepository::new(pool), agent.id)
    }

    #[tokio::test]
    async fn test_insert_and_validate_round_trip() {
        let (repo, agent_id) = setup().await;

        let mut entry = KnowledgeEntry::new(
            agent_id,
            KnowledgeKind::Insight,
            "Morning momentum fades after 10:30",
            0.6,
            1,
        );
        repo.insert(&entry).await.unwrap();

        entry.validate();
        repo.update(&entry).await.unwrap();

        let all = repo.list_for_agent(agent_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].times_validated, 1);
        assert!((all[0].confidence - 0.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_top_for_prompt_ordering() {
        let (repo, agent_id) = setup().await;

        let low = KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "low", 0.3, 2);
        let mut high = KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "high", 0.9, 3);
        high.times_validated = 2;
        let mid = KnowledgeEntry::new(agent_id, KnowledgeKind::PatternRule, "avoid mid", 0.7, 1);

        repo.insert(&low).await.unwrap();
        repo.insert(&high).await.unwrap();
        repo.insert(&mid).await.unwrap();

        let top = repo.top_for_prompt(agent_id, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].insight, "high");
        assert_eq!(top[1].insight, "avoid mid");
    }

    #[tokio::test]
    async fn test_list_filtered_by_kind_and_tag() {
        let (repo, agent_id) = setup().await;

        repo.insert(
            &KnowledgeEntry::new(agent_id, KnowledgeKind::ParameterPref, "k=2", 0.6, 1)
                .with_pattern_tag("atr_adaptive"),
        )
        .await
        .unwrap();
        repo.insert(&KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "i", 0.6, 1))
            .await
            .unwrap();

        let prefs = repo
            .list_filtered(
                agent_id,
                Some(KnowledgeKind::ParameterPref),
                Some("atr_adaptive".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].insight, "k=2");
    }

    #[tokio::test]
    async fn test_count_confident_since() {
        let (repo, agent_id) = setup().await;

        repo.insert(&KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "old", 0.9, 2))
            .await
            .unwrap();
        repo.insert(&KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "new", 0.8, 7))
            .await
            .unwrap();
        repo.insert(&KnowledgeEntry::new(agent_id, KnowledgeKind::Insight, "weak", 0.3, 8))
            .await
            .unwrap();

        assert_eq!(repo.count_confident_since(agent_id, 5, 0.7).await.unwrap(), 1);
        assert_eq!(repo.count_confident_since(agent_id, 1, 0.7).await.unwrap(), 2);
    }
}
