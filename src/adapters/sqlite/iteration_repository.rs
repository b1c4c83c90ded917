//! SQLite implementation of the IterationRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FailureReason, Iteration, IterationStatus};
use crate::domain::ports::IterationRepository;

/// Statuses counted as COMPLETED for sequencing and convergence purposes.
const COMPLETED_STATUSES: &str = "('completed', 'approved', 'rejected', 'improved_upon')";

#[derive(Clone)]
pub struct SqliteIterationRepository {
    pool: SqlitePool,
}

impl SqliteIterationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IterationRepository for SqliteIterationRepository {
    async fn create(&self, iteration: &Iteration) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO iterations (id, agent_id, iteration_number, status, failure_reason,
               scan_source, executor_source, scan_prompt, execution_prompt, analysis_prompt,
               manual_guidance, signals_found, backtest_results, win_rate, sharpe_ratio,
               total_return, winning_template, expert_analysis, refinements_suggested,
               created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(iteration.id.to_string())
        .bind(iteration.agent_id.to_string())
        .bind(iteration.iteration_number)
        .bind(iteration.status.as_str())
        .bind(iteration.failure_reason.map(|r| r.as_str()))
        .bind(&iteration.scan_source)
        .bind(&iteration.executor_source)
        .bind(&iteration.scan_prompt)
        .bind(&iteration.execution_prompt)
        .bind(&iteration.analysis_prompt)
        .bind(&iteration.manual_guidance)
        .bind(iteration.signals_found)
        .bind(
            iteration
                .backtest_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(iteration.win_rate)
        .bind(iteration.sharpe_ratio)
        .bind(iteration.total_return)
        .bind(&iteration.winning_template)
        .bind(
            iteration
                .expert_analysis
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&iteration.refinements_suggested)?)
        .bind(iteration.created_at.to_rfc3339())
        .bind(iteration.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, iteration: &Iteration) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE iterations SET status = ?, failure_reason = ?, scan_source = ?,
               executor_source = ?, scan_prompt = ?, execution_prompt = ?, analysis_prompt = ?,
               manual_guidance = ?, signals_found = ?, backtest_results = ?, win_rate = ?,
               sharpe_ratio = ?, total_return = ?, winning_template = ?, expert_analysis = ?,
               refinements_suggested = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(iteration.status.as_str())
        .bind(iteration.failure_reason.map(|r| r.as_str()))
        .bind(&iteration.scan_source)
        .bind(&iteration.executor_source)
        .bind(&iteration.scan_prompt)
        .bind(&iteration.execution_prompt)
        .bind(&iteration.analysis_prompt)
        .bind(&iteration.manual_guidance)
        .bind(iteration.signals_found)
        .bind(
            iteration
                .backtest_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(iteration.win_rate)
        .bind(iteration.sharpe_ratio)
        .bind(iteration.total_return)
        .bind(&iteration.winning_template)
        .bind(
            iteration
                .expert_analysis
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&iteration.refinements_suggested)?)
        .bind(iteration.completed_at.map(|t| t.to_rfc3339()))
        .bind(iteration.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::IterationNotFound(iteration.id));
        }

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Iteration>> {
        let row: Option<IterationRow> = sqlx::query_as("SELECT * FROM iterations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn get_by_number(&self, agent_id: Uuid, number: i64) -> DomainResult<Option<Iteration>> {
        let row: Option<IterationRow> =
            sqlx::query_as("SELECT * FROM iterations WHERE agent_id = ? AND iteration_number = ?")
                .bind(agent_id.to_string())
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn next_iteration_number(&self, agent_id: Uuid) -> DomainResult<i64> {
        let (max,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(iteration_number), 0) FROM iterations WHERE agent_id = ?",
        )
        .bind(agent_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(max + 1)
    }

    async fn latest_completed(&self, agent_id: Uuid) -> DomainResult<Option<Iteration>> {
        let sql = format!(
            "SELECT * FROM iterations WHERE agent_id = ? AND status IN {COMPLETED_STATUSES}
             ORDER BY iteration_number DESC LIMIT 1"
        );
        let row: Option<IterationRow> = sqlx::query_as(&sql)
            .bind(agent_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn recent_completed(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<Iteration>> {
        let sql = format!(
            "SELECT * FROM iterations WHERE agent_id = ? AND status IN {COMPLETED_STATUSES}
             ORDER BY iteration_number DESC LIMIT ?"
        );
        let rows: Vec<IterationRow> = sqlx::query_as(&sql)
            .bind(agent_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn count_completed(&self, agent_id: Uuid) -> DomainResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM iterations WHERE agent_id = ? AND status IN {COMPLETED_STATUSES}"
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(agent_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn list_for_agent(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<Iteration>> {
        let rows: Vec<IterationRow> = sqlx::query_as(
            "SELECT * FROM iterations WHERE agent_id = ? ORDER BY iteration_number DESC LIMIT ?",
        )
        .bind(agent_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct IterationRow {
    id: String,
    agent_id: String,
    iteration_number: i64,
    status: String,
    failure_reason: Option<String>,
    scan_source: Option<String>,
    executor_source: Option<String>,
    scan_prompt: Option<String>,
    execution_prompt: Option<String>,
    analysis_prompt: Option<String>,
    manual_guidance: Option<String>,
    signals_found: i64,
    backtest_results: Option<String>,
    win_rate: Option<f64>,
    sharpe_ratio: Option<f64>,
    total_return: Option<f64>,
    winning_template: Option<String>,
    expert_analysis: Option<String>,
    refinements_suggested: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<IterationRow> for Iteration {
    type Error = DomainError;

    fn try_from(row: IterationRow) -> Result<Self, Self::Error> {
        let status = IterationStatus::parse_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid iteration status: {}", row.status))
        })?;
        let failure_reason = row
            .failure_reason
            .as_deref()
            .map(|s| {
                FailureReason::parse_str(s).ok_or_else(|| {
                    DomainError::SerializationError(format!("Invalid failure reason: {s}"))
                })
            })
            .transpose()?;

        Ok(Iteration {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            iteration_number: row.iteration_number,
            status,
            failure_reason,
            scan_source: row.scan_source,
            executor_source: row.executor_source,
            scan_prompt: row.scan_prompt,
            execution_prompt: row.execution_prompt,
            analysis_prompt: row.analysis_prompt,
            manual_guidance: row.manual_guidance,
            signals_found: row.signals_found,
            backtest_results: super::parse_optional_json(row.backtest_results)?,
            win_rate: row.win_rate,
            sharpe_ratio: row.sharpe_ratio,
            total_return: row.total_return,
            winning_template: row.winning_template,
            expert_analysis: super::parse_optional_json(row.expert_analysis)?,
            refinements_suggested: super::parse_json_or_default(row.refinements_suggested)?,
            created_at: super::parse_datetime(&row.created_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository};
    use crate::domain::models::{Agent, Personality};
    use crate::domain::ports::AgentRepository;

    async fn setup() -> (SqliteIterationRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let agent = Agent::new("seq", "x", Personality::default());
        agents.create(&agent).await.unwrap();
        (SqliteIterationRepository::new(pool), agent.id)
    }

    #[tokio::test]
    async fn test_number_allocation_starts_at_one() {
        let (repo, agent_id) = setup().await;
        assert_eq!(repo.next_iteration_number(agent_id).await.unwrap(), 1);

        let it = Iteration::open(agent_id, 1);
        repo.create(&it).await.unwrap();
        assert_eq!(repo.next_iteration_number(agent_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_iterations_still_advance_numbering() {
        let (repo, agent_id) = setup().await;

        let mut failed = Iteration::open(agent_id, 1);
        failed.fail(FailureReason::SandboxTimeout).unwrap();
        repo.create(&failed).await.unwrap();

        assert_eq!(repo.next_iteration_number(agent_id).await.unwrap(), 2);
        assert_eq!(repo.count_completed(agent_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_update_round_trip() {
        let (repo, agent_id) = setup().await;

        let mut it = Iteration::open(agent_id, 1);
        repo.create(&it).await.unwrap();

        it.scan_source = Some("print('scan')".to_string());
        it.advance(IterationStatus::ScannerGenerated).unwrap();
        repo.update(&it).await.unwrap();

        let fetched = repo.get(it.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, IterationStatus::ScannerGenerated);
        assert_eq!(fetched.scan_source.as_deref(), Some("print('scan')"));
    }

    #[tokio::test]
    async fn test_recent_completed_excludes_failed() {
        let (repo, agent_id) = setup().await;

        for n in 1..=3 {
            let mut it = Iteration::open(agent_id, n);
            if n == 2 {
                it.fail(FailureReason::Generation).unwrap();
            } else {
                it.advance(IterationStatus::Completed).unwrap();
            }
            repo.create(&it).await.unwrap();
        }

        let recent = repo.recent_completed(agent_id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].iteration_number, 3);
        assert_eq!(recent[1].iteration_number, 1);

        let latest = repo.latest_completed(agent_id).await.unwrap().unwrap();
        assert_eq!(latest.iteration_number, 3);
    }

    #[tokio::test]
    async fn test_unique_number_per_agent_enforced() {
        let (repo, agent_id) = setup().await;
        repo.create(&Iteration::open(agent_id, 1)).await.unwrap();
        assert!(repo.create(&Iteration::open(agent_id, 1)).await.is_err());
    }
}
