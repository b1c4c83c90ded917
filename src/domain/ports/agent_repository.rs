//! Repository port for agent persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, AgentStatus};

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert a new agent, assigning its monotonic display counter.
    /// Returns the row as stored.
    async fn create(&self, agent: &Agent) -> DomainResult<Agent>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>>;

    async fn update(&self, agent: &Agent) -> DomainResult<()>;

    async fn list(&self, status: Option<AgentStatus>) -> DomainResult<Vec<Agent>>;

    /// Delete an agent; iterations, knowledge, strategy versions and
    /// activity rows cascade.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}
