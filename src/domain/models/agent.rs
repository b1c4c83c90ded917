//! Agent domain model.
//!
//! An agent is the persistent identity of a strategy-evolving entity. It
//! carries the human seed instructions, a derived personality, and a
//! lifecycle status that gates what the orchestrator may do with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Risk appetite derived from the agent's instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl Default for RiskTolerance {
    fn default() -> Self {
        Self::Moderate
    }
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conservative" => Some(Self::Conservative),
            "moderate" => Some(Self::Moderate),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }
}

/// Holding-period style derived from the agent's instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStyle {
    Scalper,
    DayTrader,
    SwingTrader,
    PositionTrader,
}

impl Default for TradingStyle {
    fn default() -> Self {
        Self::SwingTrader
    }
}

impl TradingStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scalper => "scalper",
            Self::DayTrader => "day_trader",
            Self::SwingTrader => "swing_trader",
            Self::PositionTrader => "position_trader",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scalper" => Some(Self::Scalper),
            "day_trader" => Some(Self::DayTrader),
            "swing_trader" => Some(Self::SwingTrader),
            "position_trader" => Some(Self::PositionTrader),
            _ => None,
        }
    }
}

/// Personality record set at creation from parsing the instructions.
///
/// Only an explicit update may change it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub risk_tolerance: RiskTolerance,
    pub trading_style: TradingStyle,
    /// Setup tags the agent hunts for (e.g. `vwap_bounce`, `breakout`).
    pub pattern_focus: Vec<String>,
    /// Market regimes the agent prefers (e.g. `trending`, `high_volatility`).
    pub market_conditions: Vec<String>,
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Iterating on scanner/executor pairs.
    Learning,
    /// Graduated; trades simulated against live data.
    PaperTrading,
    /// Promoted to a live brokerage account.
    LiveTrading,
    /// Suspended; `resume` restores the prior status.
    Paused,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Learning
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learning => "learning",
            Self::PaperTrading => "paper_trading",
            Self::LiveTrading => "live_trading",
            Self::Paused => "paused",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "learning" => Some(Self::Learning),
            "paper_trading" => Some(Self::PaperTrading),
            "live_trading" => Some(Self::LiveTrading),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Whether the general transition matrix permits `self -> to`.
    ///
    /// Pausing is allowed from any state. Resuming is handled separately
    /// because the target depends on the stored prior status. Graduation
    /// (learning -> paper trading) and promotion (paper -> live) are the
    /// only forward moves.
    pub fn can_transition_to(&self, to: AgentStatus) -> bool {
        if to == Self::Paused {
            return true;
        }
        matches!(
            (self, to),
            (Self::Learning, Self::PaperTrading) | (Self::PaperTrading, Self::LiveTrading)
        )
    }
}

/// Persistent identity of a strategy-evolving entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Free-text human seed the agent evolves from
    pub instructions: String,
    /// Derived personality
    pub personality: Personality,
    /// When true, executors are never generated; the template library fills
    /// that role every iteration.
    pub discovery_mode: bool,
    /// Lifecycle status
    pub status: AgentStatus,
    /// Status to restore when resuming from a pause
    pub status_before_pause: Option<AgentStatus>,
    /// Soft-delete flag
    pub is_active: bool,
    /// Monotonic display counter assigned at creation
    pub display_seq: i64,
    /// Consecutive FAILED iterations; the loop pauses the agent at 5
    pub consecutive_failures: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new agent in the learning state.
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        personality: Personality,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            instructions: instructions.into(),
            personality,
            discovery_mode: false,
            status: AgentStatus::Learning,
            status_before_pause: None,
            is_active: true,
            display_seq: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enable discovery mode (template-library executors only).
    pub fn with_discovery_mode(mut self, enabled: bool) -> Self {
        self.discovery_mode = enabled;
        self
    }

    /// Apply a status transition, enforcing the transition matrix.
    pub fn transition_to(&mut self, to: AgentStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        if to == AgentStatus::Paused {
            self.status_before_pause = Some(self.status);
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Resume from a pause, restoring the stored prior status.
    pub fn resume(&mut self) -> DomainResult<AgentStatus> {
        if self.status != AgentStatus::Paused {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: "resume".to_string(),
            });
        }
        let restored = self.status_before_pause.unwrap_or(AgentStatus::Learning);
        self.status = restored;
        self.status_before_pause = None;
        self.updated_at = Utc::now();
        Ok(restored)
    }

    /// Record an iteration outcome against the consecutive-failure counter.
    pub fn record_iteration_outcome(&mut self, failed: bool) {
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.updated_at = Utc::now();
    }
}
