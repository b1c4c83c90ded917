//! Ports: the traits adapters implement and services depend on.

pub mod activity_log;
pub mod agent_repository;
pub mod iteration_repository;
pub mod knowledge_repository;
pub mod llm_client;
pub mod market_data;
pub mod strategy_repository;

pub use activity_log::ActivityLog;
pub use agent_repository::AgentRepository;
pub use iteration_repository::IterationRepository;
pub use knowledge_repository::KnowledgeRepository;
pub use llm_client::{GeneratedArtifact, LlmClient, LlmError, LlmRequest};
pub use market_data::MarketDataStore;
pub use strategy_repository::StrategyVersionRepository;
