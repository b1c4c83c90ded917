//! Domain errors for the quantlab learning loop.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Iteration not found: {0}")]
    IterationNotFound(Uuid),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Agent {0} is not eligible for graduation: {1}")]
    NotEligible(Uuid, String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Sandbox failed: {0}")]
    SandboxFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Market data error: {0}")]
    MarketDataError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::PersistenceFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
