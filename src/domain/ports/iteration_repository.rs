//! Repository port for iteration rows.
//!
//! The iteration row is single-writer by convention: only the orchestrator
//! that allocated its number ever updates it, and each update is an
//! append-only checkpoint of a well-defined column subset.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Iteration;

#[async_trait]
pub trait IterationRepository: Send + Sync {
    async fn create(&self, iteration: &Iteration) -> DomainResult<()>;

    /// Persist the current state of the row (stage checkpoint).
    async fn update(&self, iteration: &Iteration) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Iteration>>;

    async fn get_by_number(&self, agent_id: Uuid, number: i64) -> DomainResult<Option<Iteration>>;

    /// `max(iteration_number) + 1` for the agent; the caller must hold the
    /// agent's iteration lock so the allocation is race-free.
    async fn next_iteration_number(&self, agent_id: Uuid) -> DomainResult<i64>;

    /// Most recent COMPLETED iteration (review statuses included).
    async fn latest_completed(&self, agent_id: Uuid) -> DomainResult<Option<Iteration>>;

    /// Most recent COMPLETED iterations, newest first.
    async fn recent_completed(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<Iteration>>;

    async fn count_completed(&self, agent_id: Uuid) -> DomainResult<i64>;

    /// All iterations for an agent, newest first.
    async fn list_for_agent(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<Iteration>>;
}
