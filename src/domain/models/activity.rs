//! Append-only activity log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event recorded against an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// e.g. `agent_created`, `iteration_completed`, `graduated`, `demoted`.
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(agent_id: Uuid, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
