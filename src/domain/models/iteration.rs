//! Iteration domain model.
//!
//! One iteration is the atomic unit of learning: author a scanner/executor
//! pair, backtest it, have the result critiqued, and fold the critique into
//! knowledge. The row is created when the orchestrator begins work, moves
//! through a one-way state machine with a persisted checkpoint per stage,
//! and is immutable once finalized (apart from the review statuses).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::backtest::BacktestReport;
use crate::domain::models::ExpertAnalysis;

/// State-machine label carried on the iteration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    New,
    ScannerGenerated,
    ExecutorGenerated,
    SignalsComputed,
    Backtested,
    Analyzed,
    KnowledgeUpdated,
    Completed,
    Failed,
    /// Review statuses applied after finalization.
    Approved,
    Rejected,
    ImprovedUpon,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ScannerGenerated => "scanner_generated",
            Self::ExecutorGenerated => "executor_generated",
            Self::SignalsComputed => "signals_computed",
            Self::Backtested => "backtested",
            Self::Analyzed => "analyzed",
            Self::KnowledgeUpdated => "knowledge_updated",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ImprovedUpon => "improved_upon",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(Self::New),
            "scanner_generated" => Some(Self::ScannerGenerated),
            "executor_generated" => Some(Self::ExecutorGenerated),
            "signals_computed" => Some(Self::SignalsComputed),
            "backtested" => Some(Self::Backtested),
            "analyzed" => Some(Self::Analyzed),
            "knowledge_updated" => Some(Self::KnowledgeUpdated),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "improved_upon" => Some(Self::ImprovedUpon),
            _ => None,
        }
    }

    /// Position in the forward progression; review statuses sit past
    /// `Completed` and `Failed` is reachable from any in-flight stage.
    fn order(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::ScannerGenerated => 1,
            Self::ExecutorGenerated => 2,
            Self::SignalsComputed => 3,
            Self::Backtested => 4,
            Self::Analyzed => 5,
            Self::KnowledgeUpdated => 6,
            Self::Completed | Self::Failed => 7,
            Self::Approved | Self::Rejected | Self::ImprovedUpon => 8,
        }
    }

    /// True for statuses an iteration can never leave except into review.
    pub fn is_terminal(&self) -> bool {
        self.order() >= 7
    }

    /// Whether `self -> to` is a legal one-way move.
    pub fn can_transition_to(&self, to: IterationStatus) -> bool {
        match (self, to) {
            // Failure is reachable from every in-flight stage.
            (from, Self::Failed) if !from.is_terminal() => true,
            // Review statuses only follow completion.
            (Self::Completed, Self::Approved | Self::Rejected | Self::ImprovedUpon) => true,
            // Forward moves only; stages may be skipped (e.g. discovery mode
            // goes straight from scanner_generated to signals_computed).
            (from, to) => !from.is_terminal() && !to.is_terminal() && to.order() > from.order()
                || (!from.is_terminal() && to == Self::Completed),
        }
    }
}

/// Reason tag recorded on a FAILED iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Generation,
    SandboxTimeout,
    SandboxTruncated,
    SandboxSpawn,
    Persistence,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::SandboxTimeout => "sandbox/timeout",
            Self::SandboxTruncated => "sandbox/truncated",
            Self::SandboxSpawn => "sandbox/spawn",
            Self::Persistence => "persistence",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "generation" => Some(Self::Generation),
            "sandbox/timeout" => Some(Self::SandboxTimeout),
            "sandbox/truncated" => Some(Self::SandboxTruncated),
            "sandbox/spawn" => Some(Self::SandboxSpawn),
            "persistence" => Some(Self::Persistence),
            _ => None,
        }
    }
}

/// The atomic unit of learning for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Dense, gap-free per-agent sequence starting at 1.
    pub iteration_number: i64,
    pub status: IterationStatus,
    pub failure_reason: Option<FailureReason>,
    pub scan_source: Option<String>,
    /// `None` means "template library" fills the executor role.
    pub executor_source: Option<String>,
    pub scan_prompt: Option<String>,
    pub execution_prompt: Option<String>,
    pub analysis_prompt: Option<String>,
    pub manual_guidance: Option<String>,
    pub signals_found: i64,
    pub backtest_results: Option<BacktestReport>,
    pub win_rate: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub total_return: Option<f64>,
    pub winning_template: Option<String>,
    pub expert_analysis: Option<ExpertAnalysis>,
    pub refinements_suggested: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Iteration {
    /// Open a new iteration row at the given sequence number.
    pub fn open(agent_id: Uuid, iteration_number: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            iteration_number,
            status: IterationStatus::New,
            failure_reason: None,
            scan_source: None,
            executor_source: None,
            scan_prompt: None,
            execution_prompt: None,
            analysis_prompt: None,
            manual_guidance: None,
            signals_found: 0,
            backtest_results: None,
            win_rate: None,
            sharpe_ratio: None,
            total_return: None,
            winning_template: None,
            expert_analysis: None,
            refinements_suggested: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Advance the state machine, rejecting backward or post-terminal moves.
    pub fn advance(&mut self, to: IterationStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Finalize as FAILED with a reason tag, keeping partial artifacts.
    pub fn fail(&mut self, reason: FailureReason) -> DomainResult<()> {
        self.failure_reason = Some(reason);
        self.advance(IterationStatus::Failed)
    }

    pub fn is_completed(&self) -> bool {
        matches!(
            self.status,
            IterationStatus::Completed
                | IterationStatus::Approved
                | IterationStatus::Rejected
                | IterationStatus::ImprovedUpon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_progression() {
        let mut it = Iteration::open(Uuid::new_v4(), 1);
        for status in [
            IterationStatus::ScannerGenerated,
            IterationStatus::ExecutorGenerated,
            IterationStatus::SignalsComputed,
            IterationStatus::Backtested,
            IterationStatus::Analyzed,
            IterationStatus::KnowledgeUpdated,
            IterationStatus::Completed,
        ] {
            it.advance(status).unwrap();
        }
        assert!(it.is_completed());
        assert!(it.completed_at.is_some());
    }

    #[test]
    fn test_stage_skip_allowed() {
        // Discovery mode: no executor generation stage.
        let mut it = Iteration::open(Uuid::new_v4(), 1);
        it.advance(IterationStatus::ScannerGenerated).unwrap();
        it.advance(IterationStatus::SignalsComputed).unwrap();
    }

    #[test]
    fn test_backward_move_rejected() {
        let mut it = Iteration::open(Uuid::new_v4(), 1);
        it.advance(IterationStatus::Backtested).unwrap();
        assert!(it.advance(IterationStatus::ScannerGenerated).is_err());
    }

    #[test]
    fn test_fail_from_any_stage_and_no_revival() {
        let mut it = Iteration::open(Uuid::new_v4(), 1);
        it.advance(IterationStatus::SignalsComputed).unwrap();
        it.fail(FailureReason::SandboxTimeout).unwrap();
        assert_eq!(it.status, IterationStatus::Failed);
        assert_eq!(it.failure_reason, Some(FailureReason::SandboxTimeout));
        assert!(it.advance(IterationStatus::Completed).is_err());
    }

    #[test]
    fn test_review_only_after_completion() {
        let mut it = Iteration::open(Uuid::new_v4(), 1);
        assert!(it.advance(IterationStatus::Approved).is_err());
        it.advance(IterationStatus::Completed).unwrap();
        it.advance(IterationStatus::ImprovedUpon).unwrap();
    }

    #[test]
    fn test_failure_reason_tags() {
        assert_eq!(FailureReason::SandboxTimeout.as_str(), "sandbox/timeout");
        assert_eq!(
            FailureReason::parse_str("sandbox/timeout"),
            Some(FailureReason::SandboxTimeout)
        );
    }
}
