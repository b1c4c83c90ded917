//! Convergence and graduation decisions.
//!
//! Convergence stops the continuous loop once the strategy has settled;
//! graduation promotes a settled, profitable agent out of the learning
//! state. Both read only COMPLETED iterations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Iteration;
use crate::domain::ports::{IterationRepository, KnowledgeRepository};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// COMPLETED iterations inspected.
    pub window: usize,
    /// Winner-tag changes tolerated inside the window.
    pub max_winner_changes: usize,
    /// Population stdev ceiling on the window's Sharpe ratios.
    pub sharpe_stdev_max: f64,
    /// Iterations that must pass without new high-confidence knowledge.
    pub knowledge_quiet_iterations: i64,
    /// Confidence at which a fresh entry blocks convergence.
    pub knowledge_confidence: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window: 5,
            max_winner_changes: 1,
            sharpe_stdev_max: 0.25,
            knowledge_quiet_iterations: 3,
            knowledge_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraduationConfig {
    /// COMPLETED iterations required overall.
    pub min_iterations: i64,
    /// Trailing window the averages are taken over.
    pub window: i64,
    pub min_win_rate: f64,
    pub min_sharpe: f64,
}

impl Default for GraduationConfig {
    fn default() -> Self {
        Self {
            min_iterations: 20,
            window: 10,
            min_win_rate: 0.55,
            min_sharpe: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceDecision {
    pub converged: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraduationDecision {
    pub eligible: bool,
    /// Failed gates, empty when eligible.
    pub blockers: Vec<String>,
}

pub struct ConvergenceDetector {
    iterations: Arc<dyn IterationRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    convergence: ConvergenceConfig,
    graduation: GraduationConfig,
}

impl ConvergenceDetector {
    pub fn new(
        iterations: Arc<dyn IterationRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        convergence: ConvergenceConfig,
        graduation: GraduationConfig,
    ) -> Self {
        Self {
            iterations,
            knowledge,
            convergence,
            graduation,
        }
    }

    /// Decide whether the agent's learning has converged.
    pub async fn check_convergence(&self, agent_id: Uuid) -> DomainResult<ConvergenceDecision> {
        let mut recent = self
            .iterations
            .recent_completed(agent_id, self.convergence.window as i64)
            .await?;
        recent.reverse(); // ascending iteration order

        if recent.len() < self.convergence.window {
            return Ok(ConvergenceDecision {
                converged: false,
                reason: format!(
                    "only {} of {} completed iterations",
                    recent.len(),
                    self.convergence.window
                ),
            });
        }

        let changes = winner_changes(&recent);
        if changes > self.convergence.max_winner_changes {
            return Ok(ConvergenceDecision {
                converged: false,
                reason: format!("winning template changed {changes} times in the window"),
            });
        }

        let sharpes: Vec<f64> = recent.iter().map(|i| i.sharpe_ratio.unwrap_or(0.0)).collect();
        let stdev = population_stdev(&sharpes);
        if stdev > self.convergence.sharpe_stdev_max {
            return Ok(ConvergenceDecision {
                converged: false,
                reason: format!("sharpe stdev {stdev:.3} above threshold"),
            });
        }

        let latest = recent.last().map(|i| i.iteration_number).unwrap_or(0);
        let quiet_floor = latest - self.convergence.knowledge_quiet_iterations + 1;
        let fresh = self
            .knowledge
            .count_confident_since(agent_id, quiet_floor, self.convergence.knowledge_confidence)
            .await?;
        if fresh > 0 {
            return Ok(ConvergenceDecision {
                converged: false,
                reason: format!("{fresh} high-confidence lessons still arriving"),
            });
        }

        Ok(ConvergenceDecision {
            converged: true,
            reason: "winner stable, sharpe settled, knowledge quiet".to_string(),
        })
    }

    /// Decide graduation eligibility (learning -> paper trading gates).
    pub async fn check_graduation(&self, agent_id: Uuid) -> DomainResult<GraduationDecision> {
        let mut blockers = Vec::new();

        let completed = self.iterations.count_completed(agent_id).await?;
        if completed < self.graduation.min_iterations {
            blockers.push(format!(
                "{completed} completed iterations, {} required",
                self.graduation.min_iterations
            ));
        }

        let recent = self
            .iterations
            .recent_completed(agent_id, self.graduation.window)
            .await?;
        if recent.is_empty() {
            blockers.push("no completed iterations to average".to_string());
            return Ok(GraduationDecision {
                eligible: false,
                blockers,
            });
        }

        let n = recent.len() as f64;
        let avg_win_rate = recent.iter().map(|i| i.win_rate.unwrap_or(0.0)).sum::<f64>() / n;
        let avg_sharpe = recent.iter().map(|i| i.sharpe_ratio.unwrap_or(0.0)).sum::<f64>() / n;
        let avg_return = recent.iter().map(|i| i.total_return.unwrap_or(0.0)).sum::<f64>() / n;

        if avg_win_rate < self.graduation.min_win_rate {
            blockers.push(format!(
                "average win rate {avg_win_rate:.2} below {}",
                self.graduation.min_win_rate
            ));
        }
        if avg_sharpe < self.graduation.min_sharpe {
            blockers.push(format!(
                "average sharpe {avg_sharpe:.2} below {}",
                self.graduation.min_sharpe
            ));
        }
        if avg_return <= 0.0 {
            blockers.push(format!("average total return {avg_return:.2} not positive"));
        }

        Ok(GraduationDecision {
            eligible: blockers.is_empty(),
            blockers,
        })
    }
}

/// Count winner-tag changes between consecutive iterations.
fn winner_changes(window: &[Iteration]) -> usize {
    window
        .windows(2)
        .filter(|pair| pair[0].winning_template != pair[1].winning_template)
        .count()
}

/// Population standard deviation (divide by N).
pub fn population_stdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteIterationRepository,
        SqliteKnowledgeRepository,
    };
    use crate::domain::models::{
        Agent, IterationStatus, KnowledgeEntry, KnowledgeKind, Personality,
    };
    use crate::domain::ports::AgentRepository;

    struct Fixture {
        detector: ConvergenceDetector,
        iterations: Arc<SqliteIterationRepository>,
        knowledge: Arc<SqliteKnowledgeRepository>,
        agent_id: Uuid,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let agent = Agent::new("c", "x", Personality::default());
        agents.create(&agent).await.unwrap();

        let iterations = Arc::new(SqliteIterationRepository::new(pool.clone()));
        let knowledge = Arc::new(SqliteKnowledgeRepository::new(pool));
        let detector = ConvergenceDetector::new(
            iterations.clone(),
            knowledge.clone(),
            ConvergenceConfig::default(),
            GraduationConfig::default(),
        );
        Fixture {
            detector,
            iterations,
            knowledge,
            agent_id: agent.id,
        }
    }

    async fn seed_completed(
        fixture: &Fixture,
        number: i64,
        winner: &str,
        sharpe: f64,
        win_rate: f64,
        total_return: f64,
    ) {
        let mut it = Iteration::open(fixture.agent_id, number);
        it.winning_template = Some(winner.to_string());
        it.sharpe_ratio = Some(sharpe);
        it.win_rate = Some(win_rate);
        it.total_return = Some(total_return);
        it.advance(IterationStatus::Completed).unwrap();
        fixture.iterations.create(&it).await.unwrap();
    }

    #[tokio::test]
    async fn test_stable_window_converges() {
        let fixture = setup().await;
        for (i, sharpe) in [1.2, 1.15, 1.22, 1.18, 1.19].iter().enumerate() {
            seed_completed(&fixture, i as i64 + 1, "atr_adaptive", *sharpe, 0.6, 500.0).await;
        }

        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(decision.converged, "{}", decision.reason);
    }

    #[tokio::test]
    async fn test_sharpe_spike_blocks_convergence() {
        let fixture = setup().await;
        for (i, sharpe) in [1.2, 1.15, 1.22, 1.18, 1.9].iter().enumerate() {
            seed_completed(&fixture, i as i64 + 1, "atr_adaptive", *sharpe, 0.6, 500.0).await;
        }

        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(!decision.converged);
        assert!(decision.reason.contains("sharpe stdev"));
    }

    #[tokio::test]
    async fn test_winner_churn_blocks_convergence() {
        let fixture = setup().await;
        let winners = ["conservative", "atr_adaptive", "conservative", "atr_adaptive", "conservative"];
        for (i, winner) in winners.iter().enumerate() {
            seed_completed(&fixture, i as i64 + 1, winner, 1.2, 0.6, 500.0).await;
        }

        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(!decision.converged);
        assert!(decision.reason.contains("winning template changed"));
    }

    #[tokio::test]
    async fn test_one_winner_change_tolerated() {
        let fixture = setup().await;
        let winners = ["conservative", "atr_adaptive", "atr_adaptive", "atr_adaptive", "atr_adaptive"];
        for (i, winner) in winners.iter().enumerate() {
            seed_completed(&fixture, i as i64 + 1, winner, 1.2, 0.6, 500.0).await;
        }

        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(decision.converged, "{}", decision.reason);
    }

    #[tokio::test]
    async fn test_fresh_confident_knowledge_blocks() {
        let fixture = setup().await;
        for i in 1..=5 {
            seed_completed(&fixture, i, "atr_adaptive", 1.2, 0.6, 500.0).await;
        }
        // Learned during iteration 5 with confidence 0.8.
        fixture
            .knowledge
            .insert(&KnowledgeEntry::new(
                fixture.agent_id,
                KnowledgeKind::Insight,
                "late lesson",
                0.8,
                5,
            ))
            .await
            .unwrap();

        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(!decision.converged);

        // The same lesson three iterations back no longer blocks.
        let fixture2 = setup().await;
        for i in 1..=5 {
            seed_completed(&fixture2, i, "atr_adaptive", 1.2, 0.6, 500.0).await;
        }
        fixture2
            .knowledge
            .insert(&KnowledgeEntry::new(
                fixture2.agent_id,
                KnowledgeKind::Insight,
                "old lesson",
                0.8,
                2,
            ))
            .await
            .unwrap();
        let decision = fixture2.detector.check_convergence(fixture2.agent_id).await.unwrap();
        assert!(decision.converged, "{}", decision.reason);
    }

    #[tokio::test]
    async fn test_short_history_never_converges() {
        let fixture = setup().await;
        for i in 1..=4 {
            seed_completed(&fixture, i, "atr_adaptive", 1.2, 0.6, 500.0).await;
        }
        let decision = fixture.detector.check_convergence(fixture.agent_id).await.unwrap();
        assert!(!decision.converged);
    }

    #[tokio::test]
    async fn test_graduation_gate_at_nineteen_iterations() {
        let fixture = setup().await;
        for i in 1..=19 {
            seed_completed(&fixture, i, "atr_adaptive", 1.2, 0.6, 500.0).await;
        }

        let decision = fixture.detector.check_graduation(fixture.agent_id).await.unwrap();
        assert!(!decision.eligible);
        assert!(decision.blockers.iter().any(|b| b.contains("19 completed")));

        seed_completed(&fixture, 20, "atr_adaptive", 1.2, 0.6, 500.0).await;
        let decision = fixture.detector.check_graduation(fixture.agent_id).await.unwrap();
        assert!(decision.eligible, "{:?}", decision.blockers);
    }

    #[tokio::test]
    async fn test_graduation_blocked_by_weak_metrics() {
        let fixture = setup().await;
        for i in 1..=20 {
            seed_completed(&fixture, i, "atr_adaptive", 0.4, 0.45, -50.0).await;
        }

        let decision = fixture.detector.check_graduation(fixture.agent_id).await.unwrap();
        assert!(!decision.eligible);
        assert_eq!(decision.blockers.len(), 3);
    }

    #[test]
    fn test_population_stdev() {
        assert!((population_stdev(&[]) - 0.0).abs() < 1e-12);
        assert!((population_stdev(&[1.0, 1.0]) - 0.0).abs() < 1e-12);
        // [1, 3]: mean 2, variance 1.
        assert!((population_stdev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
