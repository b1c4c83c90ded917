//! Agent lifecycle operations: creation, pause/resume, graduation,
//! promotion and demotion. Every action lands in the activity log.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActivityEvent, Agent, AgentStatus, StrategyVersion};
use crate::domain::ports::{
    ActivityLog, AgentRepository, IterationRepository, StrategyVersionRepository,
};
use crate::services::convergence::ConvergenceDetector;
use crate::services::personality::parse_personality;

pub struct AgentService {
    agents: Arc<dyn AgentRepository>,
    iterations: Arc<dyn IterationRepository>,
    versions: Arc<dyn StrategyVersionRepository>,
    activity: Arc<dyn ActivityLog>,
    detector: Arc<ConvergenceDetector>,
}

impl AgentService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        iterations: Arc<dyn IterationRepository>,
        versions: Arc<dyn StrategyVersionRepository>,
        activity: Arc<dyn ActivityLog>,
        detector: Arc<ConvergenceDetector>,
    ) -> Self {
        Self {
            agents,
            iterations,
            versions,
            activity,
            detector,
        }
    }

    /// Create an agent with a personality derived from its instructions.
    pub async fn create_agent(
        &self,
        instructions: &str,
        name: Option<String>,
        discovery_mode: bool,
    ) -> DomainResult<Agent> {
        let personality = parse_personality(instructions);
        let name = name.unwrap_or_else(|| default_name(instructions));
        let agent =
            Agent::new(name, instructions, personality).with_discovery_mode(discovery_mode);

        let stored = self.agents.create(&agent).await?;
        self.activity
            .record(&ActivityEvent::new(
                stored.id,
                "agent_created",
                json!({
                    "name": stored.name,
                    "risk_tolerance": stored.personality.risk_tolerance.as_str(),
                    "trading_style": stored.personality.trading_style.as_str(),
                    "discovery_mode": stored.discovery_mode,
                }),
            ))
            .await?;

        tracing::info!(agent_id = %stored.id, name = %stored.name, "Agent created");
        Ok(stored)
    }

    pub async fn get_agent(&self, id: Uuid) -> DomainResult<Agent> {
        self.agents
            .get(id)
            .await?
            .ok_or(DomainError::AgentNotFound(id))
    }

    pub async fn list_agents(&self, status: Option<AgentStatus>) -> DomainResult<Vec<Agent>> {
        self.agents.list(status).await
    }

    pub async fn pause(&self, id: Uuid) -> DomainResult<Agent> {
        let mut agent = self.get_agent(id).await?;
        agent.transition_to(AgentStatus::Paused)?;
        self.agents.update(&agent).await?;
        self.activity
            .record(&ActivityEvent::new(id, "paused", json!({})))
            .await?;
        Ok(agent)
    }

    pub async fn resume(&self, id: Uuid) -> DomainResult<Agent> {
        let mut agent = self.get_agent(id).await?;
        let restored = agent.resume()?;
        agent.consecutive_failures = 0;
        self.agents.update(&agent).await?;
        self.activity
            .record(&ActivityEvent::new(
                id,
                "resumed",
                json!({"restored_status": restored.as_str()}),
            ))
            .await?;
        Ok(agent)
    }

    /// Graduate learning -> paper trading, snapshotting the current
    /// scanner/executor pair as a new current strategy version.
    pub async fn graduate(&self, id: Uuid, force: bool) -> DomainResult<Agent> {
        let mut agent = self.get_agent(id).await?;

        if agent.status != AgentStatus::Learning {
            return Err(DomainError::InvalidStatusTransition {
                from: agent.status.as_str().to_string(),
                to: AgentStatus::PaperTrading.as_str().to_string(),
            });
        }

        if !force {
            let decision = self.detector.check_graduation(id).await?;
            if !decision.eligible {
                return Err(DomainError::NotEligible(id, decision.blockers.join("; ")));
            }
        }

        let latest = self
            .iterations
            .latest_completed(id)
            .await?
            .ok_or_else(|| DomainError::NotEligible(id, "no completed iterations".to_string()))?;
        let scan_source = latest.scan_source.clone().ok_or_else(|| {
            DomainError::NotEligible(id, "latest iteration has no scanner source".to_string())
        })?;

        let parent = self.versions.current_for_agent(id).await?;
        let mut version = StrategyVersion::new(
            id,
            StrategyVersion::next_version(parent.as_ref().map(|v| v.version.as_str())),
            scan_source,
        );
        version.executor_source = latest.executor_source.clone();
        version.win_rate = latest.win_rate.unwrap_or(0.0);
        version.sharpe_ratio = latest.sharpe_ratio.unwrap_or(0.0);
        version.total_return = latest.total_return.unwrap_or(0.0);
        version.winning_template = latest.winning_template.clone().unwrap_or_default();
        version.parent_version_id = parent.as_ref().map(|v| v.id);
        version.change_summary = format!(
            "Promoted from iteration {} (winner {})",
            latest.iteration_number,
            version.winning_template
        );

        self.versions.insert_as_current(&version).await?;

        agent.transition_to(AgentStatus::PaperTrading)?;
        self.agents.update(&agent).await?;

        self.activity
            .record(&ActivityEvent::new(
                id,
                "graduated",
                json!({
                    "graduated_forced": force,
                    "version": version.version,
                    "from_iteration": latest.iteration_number,
                }),
            ))
            .await?;

        tracing::info!(agent_id = %id, version = %version.version, forced = force, "Agent graduated");
        Ok(agent)
    }

    /// Promote paper trading -> live trading.
    pub async fn promote_live(&self, id: Uuid) -> DomainResult<Agent> {
        let mut agent = self.get_agent(id).await?;
        agent.transition_to(AgentStatus::LiveTrading)?;
        self.agents.update(&agent).await?;
        self.activity
            .record(&ActivityEvent::new(id, "promoted_live", json!({})))
            .await?;
        Ok(agent)
    }

    /// Demote one rung: live -> paper, or paper -> learning. An explicit
    /// administrative path, mirroring graduate.
    pub async fn demote(&self, id: Uuid, reason: &str) -> DomainResult<Agent> {
        let mut agent = self.get_agent(id).await?;

        let target = match agent.status {
            AgentStatus::LiveTrading => AgentStatus::PaperTrading,
            AgentStatus::PaperTrading => AgentStatus::Learning,
            other => {
                return Err(DomainError::InvalidStatusTransition {
                    from: other.as_str().to_string(),
                    to: "demoted".to_string(),
                })
            }
        };

        agent.status = target;
        agent.status_before_pause = None;
        agent.updated_at = chrono::Utc::now();
        self.agents.update(&agent).await?;

        self.activity
            .record(&ActivityEvent::new(
                id,
                "demoted",
                json!({"reason": reason, "to": target.as_str()}),
            ))
            .await?;

        tracing::warn!(agent_id = %id, to = target.as_str(), reason, "Agent demoted");
        Ok(agent)
    }

    pub async fn delete_agent(&self, id: Uuid) -> DomainResult<()> {
        // Cascades to iterations, knowledge, versions and the log.
        self.agents.delete(id).await
    }
}

/// Short display name derived from the first words of the instructions.
fn default_name(instructions: &str) -> String {
    let words: Vec<&str> = instructions.split_whitespace().take(4).collect();
    if words.is_empty() {
        "unnamed-agent".to_string()
    } else {
        words.join(" ")
    }
}
