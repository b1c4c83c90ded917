//! Append-only audit log port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ActivityEvent;

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, event: &ActivityEvent) -> DomainResult<()>;

    /// Newest first.
    async fn list_for_agent(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<ActivityEvent>>;
}
