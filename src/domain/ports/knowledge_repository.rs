//! Repository port for the knowledge store.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{KnowledgeEntry, KnowledgeKind};

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn insert(&self, entry: &KnowledgeEntry) -> DomainResult<()>;

    async fn update(&self, entry: &KnowledgeEntry) -> DomainResult<()>;

    /// Every entry for the agent, unordered.
    async fn list_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<KnowledgeEntry>>;

    /// Filterable listing for the read queries.
    async fn list_filtered(
        &self,
        agent_id: Uuid,
        kind: Option<KnowledgeKind>,
        pattern_tag: Option<String>,
    ) -> DomainResult<Vec<KnowledgeEntry>>;

    /// Bounded top-K view for prompt assembly, ordered by confidence desc,
    /// times_validated desc, learned_from_iteration asc, id asc.
    async fn top_for_prompt(&self, agent_id: Uuid, limit: i64) -> DomainResult<Vec<KnowledgeEntry>>;

    /// Entries learned at or after the given iteration number with
    /// confidence at or above the threshold (convergence probe).
    async fn count_confident_since(
        &self,
        agent_id: Uuid,
        min_iteration: i64,
        min_confidence: f64,
    ) -> DomainResult<i64>;
}
