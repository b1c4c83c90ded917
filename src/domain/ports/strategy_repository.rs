//! Repository port for promoted strategy versions.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::StrategyVersion;

#[async_trait]
pub trait StrategyVersionRepository: Send + Sync {
    /// Insert a version and mark it current, clearing the flag on every
    /// other version of the agent inside one transaction.
    async fn insert_as_current(&self, version: &StrategyVersion) -> DomainResult<()>;

    async fn current_for_agent(&self, agent_id: Uuid) -> DomainResult<Option<StrategyVersion>>;

    /// All versions, newest first.
    async fn list_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<StrategyVersion>>;
}
