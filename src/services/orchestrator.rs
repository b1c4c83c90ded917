//! Iteration orchestrator: drives one iteration end-to-end and runs the
//! continuous learning loop.
//!
//! Concurrency model: single-threaded cooperative per agent (a per-agent
//! advisory lock is held for the whole iteration), parallel across agents,
//! with a global semaphore capping concurrently active sandboxes. Each
//! state-machine stage persists a checkpoint; a crash loses nothing that
//! was checkpointed, and a resumed orchestrator simply opens a new
//! iteration with the next number.

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::llm::generate_artifact;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityEvent, Agent, AgentStatus, ExpertAnalysis, FailureReason, Iteration, IterationStatus,
    OrchestratorConfig,
};
use crate::domain::ports::{
    ActivityLog, AgentRepository, GeneratedArtifact, IterationRepository, KnowledgeRepository,
    LlmClient, LlmError, LlmRequest, MarketDataStore,
};
use crate::services::convergence::ConvergenceDetector;
use crate::services::evaluator::BacktestEvaluator;
use crate::services::knowledge_extractor::KnowledgeExtractor;
use crate::services::output_parser::{parse_signals, parse_trades, recover_json_value};
use crate::services::prompt_assembler::{PromptAssembler, PromptContext, KNOWLEDGE_CAP};
use crate::services::sandbox::{ExecutionOutcome, ExecutionRequest, ScriptSandbox};

/// Options for a single unconditional iteration.
#[derive(Debug, Clone, Default)]
pub struct RunOnceOptions {
    pub manual_guidance: Option<String>,
    /// Per-LLM-request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    pub discovery_mode_override: Option<bool>,
}

/// Options for the continuous loop.
#[derive(Debug, Clone)]
pub struct ContinuousOptions {
    pub max_iterations: Option<u64>,
    /// Iterations run before convergence is consulted.
    pub min_iterations: u64,
    pub stop_on_convergence: bool,
}

impl Default for ContinuousOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            min_iterations: 3,
            stop_on_convergence: true,
        }
    }
}

const DEFAULT_LLM_TIMEOUT_MS: u64 = 180_000;

pub struct IterationOrchestrator {
    agents: Arc<dyn AgentRepository>,
    iterations: Arc<dyn IterationRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    activity: Arc<dyn ActivityLog>,
    llm: Arc<dyn LlmClient>,
    market: Arc<dyn MarketDataStore>,
    sandbox: Arc<ScriptSandbox>,
    evaluator: Arc<BacktestEvaluator>,
    extractor: Arc<KnowledgeExtractor>,
    detector: Arc<ConvergenceDetector>,
    config: OrchestratorConfig,
    /// One advisory lock per agent; held for a whole iteration.
    iteration_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Global cap on concurrently active sandboxes.
    sandbox_slots: Arc<Semaphore>,
    /// Cancellation flags for running continuous loops.
    loops: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl IterationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        iterations: Arc<dyn IterationRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        activity: Arc<dyn ActivityLog>,
        llm: Arc<dyn LlmClient>,
        market: Arc<dyn MarketDataStore>,
        sandbox: Arc<ScriptSandbox>,
        evaluator: Arc<BacktestEvaluator>,
        extractor: Arc<KnowledgeExtractor>,
        detector: Arc<ConvergenceDetector>,
        config: OrchestratorConfig,
    ) -> Self {
        let sandbox_slots = Arc::new(Semaphore::new(config.max_concurrent_sandboxes.max(1)));
        Self {
            agents,
            iterations,
            knowledge,
            activity,
            llm,
            market,
            sandbox,
            evaluator,
            extractor,
            detector,
            config,
            iteration_locks: Mutex::new(HashMap::new()),
            sandbox_slots,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Execute exactly one iteration for the agent. Never fails with a
    /// convergence condition; a FAILED iteration surfaces as an error but
    /// remains persisted as a first-class row.
    pub async fn run_once(&self, agent_id: Uuid, opts: RunOnceOptions) -> DomainResult<Iteration> {
        let mut agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or(DomainError::AgentNotFound(agent_id))?;

        let lock = self.agent_lock(agent_id).await;
        let _guard = lock.lock().await;

        let discovery_mode = opts.discovery_mode_override.unwrap_or(agent.discovery_mode);
        let llm_timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_LLM_TIMEOUT_MS);

        let number = self.iterations.next_iteration_number(agent_id).await?;
        let previous = self.iterations.latest_completed(agent_id).await?;
        let knowledge = self.knowledge.top_for_prompt(agent_id, KNOWLEDGE_CAP).await?;

        let mut iteration = Iteration::open(agent_id, number);
        iteration.manual_guidance = opts.manual_guidance.clone();
        self.iterations.create(&iteration).await?;

        info!(agent_id = %agent_id, iteration = number, "Iteration opened");

        // Snapshot for prompt assembly; `agent` itself is mutated on the
        // failure paths while the context stays borrowed.
        let prompt_agent = agent.clone();
        let ctx = PromptContext {
            agent: &prompt_agent,
            previous: previous.as_ref(),
            knowledge: &knowledge,
            manual_guidance: opts.manual_guidance.as_deref(),
            interpreter: self.sandbox.interpreter(),
        };

        // Stage: scanner generation.
        let (scan_system, scan_user) = PromptAssembler::scanner_prompts(&ctx);
        iteration.scan_prompt = Some(scan_user.clone());
        let artifact = match self
            .generate_with_retry(&scan_system, &scan_user, llm_timeout_ms)
            .await
        {
            Ok(artifact) => artifact,
            Err(err) => {
                self.finalize_failed(&mut iteration, &mut agent, FailureReason::Generation)
                    .await;
                return Err(DomainError::GenerationFailed(format!(
                    "scanner generation: {err}"
                )));
            }
        };
        iteration.scan_source = Some(artifact.source_code.clone());
        iteration.advance(IterationStatus::ScannerGenerated)?;
        self.iterations.update(&iteration).await?;

        // Stage: executor generation, unless the template library fills
        // the role (discovery mode, or no prior iteration to learn from).
        if !discovery_mode && previous.is_some() {
            let (exec_system, exec_user) = PromptAssembler::executor_prompts(&ctx);
            iteration.execution_prompt = Some(exec_user.clone());
            match self
                .generate_with_retry(&exec_system, &exec_user, llm_timeout_ms)
                .await
            {
                Ok(artifact) => {
                    iteration.executor_source = Some(artifact.source_code);
                    iteration.advance(IterationStatus::ExecutorGenerated)?;
                    self.iterations.update(&iteration).await?;
                }
                Err(err) => {
                    self.finalize_failed(&mut iteration, &mut agent, FailureReason::Generation)
                        .await;
                    return Err(DomainError::GenerationFailed(format!(
                        "executor generation: {err}"
                    )));
                }
            }
        }

        // Stage: run the scanner. Zero signals is a finding, not a failure.
        let scan_source = artifact.source_code;
        let outcome = match self
            .run_sandboxed(&scan_source, self.sandbox.scanner_timeout(), None)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.finalize_failed(&mut iteration, &mut agent, FailureReason::SandboxSpawn)
                    .await;
                return Err(err);
            }
        };
        if let Some(reason) = sandbox_failure(&outcome) {
            self.finalize_failed(&mut iteration, &mut agent, reason).await;
            return Err(DomainError::SandboxFailed(format!(
                "scanner: {}",
                reason.as_str()
            )));
        }
        let signals = parse_signals(&outcome.stdout);
        iteration.signals_found = signals.len() as i64;
        iteration.advance(IterationStatus::SignalsComputed)?;
        self.iterations.update(&iteration).await?;

        // Custom-executor lane: signals on stdin, trades on stdout.
        let custom_trades = match &iteration.executor_source {
            Some(source) => {
                let stdin = serde_json::to_string(&signals)?;
                let outcome = match self
                    .run_sandboxed(source, self.sandbox.executor_timeout(), Some(stdin))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.finalize_failed(&mut iteration, &mut agent, FailureReason::SandboxSpawn)
                            .await;
                        return Err(err);
                    }
                };
                if let Some(reason) = sandbox_failure(&outcome) {
                    self.finalize_failed(&mut iteration, &mut agent, reason).await;
                    return Err(DomainError::SandboxFailed(format!(
                        "executor: {}",
                        reason.as_str()
                    )));
                }
                Some(parse_trades(&outcome.stdout))
            }
            None => None,
        };

        // Stage: backtest against the full template library.
        let report = match self.evaluator.evaluate(&signals, custom_trades).await {
            Ok(report) => report,
            Err(err) => {
                self.finalize_failed(&mut iteration, &mut agent, FailureReason::Persistence)
                    .await;
                return Err(err);
            }
        };
        if let Some(winner) = report.winner() {
            iteration.win_rate = Some(winner.win_rate);
            iteration.sharpe_ratio = Some(winner.sharpe_ratio);
            iteration.total_return = Some(winner.total_return);
            iteration.winning_template = Some(winner.template.clone());
        }
        iteration.backtest_results = Some(report.clone());
        iteration.advance(IterationStatus::Backtested)?;
        self.iterations.update(&iteration).await?;

        // Stage: expert analysis. Any text survives; an unusable response
        // degrades to an empty analysis rather than losing the iteration.
        let (analysis_system, analysis_user) =
            PromptAssembler::analysis_prompts(&ctx, &iteration, &report);
        iteration.analysis_prompt = Some(analysis_user.clone());
        let analysis = match self
            .llm
            .complete(
                LlmRequest::new(analysis_system, analysis_user).with_timeout_ms(llm_timeout_ms),
            )
            .await
        {
            Ok(raw) => parse_analysis(&raw),
            Err(err) => {
                self.finalize_failed(&mut iteration, &mut agent, FailureReason::Generation)
                    .await;
                return Err(DomainError::GenerationFailed(format!("analysis: {err}")));
            }
        };
        iteration.expert_analysis = Some(analysis.clone());
        iteration.refinements_suggested = analysis.refinements();
        iteration.advance(IterationStatus::Analyzed)?;
        self.iterations.update(&iteration).await?;

        iteration.advance(IterationStatus::KnowledgeUpdated)?;
        self.iterations.update(&iteration).await?;

        // Finalize before the knowledge writes land, so knowledge readers
        // never see entries attributed to an unfinalized iteration.
        iteration.advance(IterationStatus::Completed)?;
        self.iterations.update(&iteration).await?;

        agent.record_iteration_outcome(false);
        self.agents.update(&agent).await?;

        self.extractor
            .apply_analysis(agent_id, number, &analysis, iteration.signals_found)
            .await?;

        self.activity
            .record(&ActivityEvent::new(
                agent_id,
                "iteration_completed",
                json!({
                    "iteration": number,
                    "signals_found": iteration.signals_found,
                    "winning_template": iteration.winning_template,
                }),
            ))
            .await?;

        info!(
            agent_id = %agent_id,
            iteration = number,
            signals = iteration.signals_found,
            winner = iteration.winning_template.as_deref().unwrap_or("-"),
            "Iteration completed"
        );

        Ok(iteration)
    }

    /// Run the learning loop until convergence, the iteration budget, a
    /// cancellation, or an auto-pause. Results stream over the channel.
    pub fn run_continuous(
        self: &Arc<Self>,
        agent_id: Uuid,
        opts: ContinuousOptions,
    ) -> mpsc::Receiver<DomainResult<Iteration>> {
        let (tx, rx) = mpsc::channel(16);
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            let cancel = {
                let mut loops = orchestrator.loops.lock().await;
                if loops.get(&agent_id).is_some_and(|f| !f.load(Ordering::SeqCst)) {
                    let _ = tx
                        .send(Err(DomainError::ValidationFailed(format!(
                            "continuous loop already running for agent {agent_id}"
                        ))))
                        .await;
                    return;
                }
                let flag = Arc::new(AtomicBool::new(false));
                loops.insert(agent_id, flag.clone());
                flag
            };

            let mut completed: u64 = 0;
            loop {
                // Cancellation is checked between iterations only; an
                // in-flight iteration always runs to completion or failure.
                if cancel.load(Ordering::SeqCst) {
                    break;
                }

                let result = orchestrator.run_once(agent_id, RunOnceOptions::default()).await;
                let errored = result.is_err();
                if tx.send(result).await.is_err() {
                    break;
                }
                completed += 1;

                if errored {
                    match orchestrator.agents.get(agent_id).await {
                        Ok(Some(agent)) if agent.status == AgentStatus::Paused => {
                            warn!(agent_id = %agent_id, "Agent paused, stopping loop");
                            break;
                        }
                        Ok(Some(_)) => {}
                        _ => break,
                    }
                }

                if opts.max_iterations.is_some_and(|max| completed >= max) {
                    break;
                }

                if opts.stop_on_convergence && completed >= opts.min_iterations {
                    match orchestrator.detector.check_convergence(agent_id).await {
                        Ok(decision) if decision.converged => {
                            info!(agent_id = %agent_id, reason = %decision.reason, "Convergence reached");
                            let _ = orchestrator
                                .activity
                                .record(&ActivityEvent::new(
                                    agent_id,
                                    "convergence_reached",
                                    json!({"reason": decision.reason}),
                                ))
                                .await;
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!(agent_id = %agent_id, error = %err, "Convergence check failed");
                        }
                    }
                }
            }

            let mut loops = orchestrator.loops.lock().await;
            if loops.get(&agent_id).is_some_and(|f| Arc::ptr_eq(f, &cancel)) {
                loops.remove(&agent_id);
            }
        });

        rx
    }

    /// Signal a running loop to stop after its current iteration.
    pub async fn stop_continuous(&self, agent_id: Uuid) -> bool {
        let loops = self.loops.lock().await;
        match loops.get(&agent_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn agent_lock(&self, agent_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.iteration_locks.lock().await;
        locks
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Scanner/executor generation: up to `generation_retries` retries with
    /// exponential backoff (base 2 s, cap 16 s).
    async fn generate_with_retry(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout_ms: u64,
    ) -> Result<GeneratedArtifact, LlmError> {
        let retries = self.config.generation_retries;
        let base = self.config.generation_backoff_base_secs.max(1);
        let cap = self.config.generation_backoff_cap_secs.max(base);

        let mut last_error = None;
        for attempt in 0..=retries {
            let request =
                LlmRequest::new(system_prompt, user_prompt).with_timeout_ms(timeout_ms);
            match generate_artifact(self.llm.as_ref(), request).await {
                Ok(artifact) => return Ok(artifact),
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = retries + 1,
                        error = %err,
                        "Generation attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < retries {
                        let delay = (base << attempt).min(cap);
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::TransportFailure("generation retries exhausted".to_string())))
    }

    /// Run one script under the global sandbox concurrency cap.
    async fn run_sandboxed(
        &self,
        source: &str,
        timeout: Duration,
        stdin: Option<String>,
    ) -> DomainResult<ExecutionOutcome> {
        let _permit = self
            .sandbox_slots
            .acquire()
            .await
            .map_err(|_| DomainError::SandboxFailed("sandbox pool closed".to_string()))?;

        let request = ExecutionRequest {
            source: source.to_string(),
            timeout,
            env: vec![(
                "QUANTLAB_MARKET_DB".to_string(),
                self.market.database_path().to_string_lossy().into_owned(),
            )],
            stdin,
        };

        self.sandbox
            .execute(request)
            .await
            .map_err(|e| DomainError::SandboxFailed(e.to_string()))
    }

    /// Persist the FAILED row, bump the failure counter and auto-pause the
    /// agent when the threshold is reached. Best-effort: a failing failure
    /// path is logged, never propagated over the original error.
    async fn finalize_failed(
        &self,
        iteration: &mut Iteration,
        agent: &mut Agent,
        reason: FailureReason,
    ) {
        if let Err(err) = iteration.fail(reason) {
            error!(iteration = iteration.iteration_number, error = %err, "Could not mark iteration failed");
        }
        if let Err(err) = self.iterations.update(iteration).await {
            error!(iteration = iteration.iteration_number, error = %err, "Could not persist failed iteration");
        }

        agent.record_iteration_outcome(true);
        let auto_pause = agent.consecutive_failures >= self.config.max_consecutive_failures
            && agent.status != AgentStatus::Paused;
        if auto_pause {
            if let Err(err) = agent.transition_to(AgentStatus::Paused) {
                error!(agent_id = %agent.id, error = %err, "Could not auto-pause agent");
            }
        }
        if let Err(err) = self.agents.update(agent).await {
            error!(agent_id = %agent.id, error = %err, "Could not persist agent after failure");
        }

        let _ = self
            .activity
            .record(&ActivityEvent::new(
                agent.id,
                "iteration_failed",
                json!({
                    "iteration": iteration.iteration_number,
                    "reason": reason.as_str(),
                    "consecutive_failures": agent.consecutive_failures,
                }),
            ))
            .await;
        if auto_pause {
            warn!(agent_id = %agent.id, failures = agent.consecutive_failures, "Agent auto-paused");
            let _ = self
                .activity
                .record(&ActivityEvent::new(
                    agent.id,
                    "agent_auto_paused",
                    json!({"consecutive_failures": agent.consecutive_failures}),
                ))
                .await;
        }
    }
}

/// Map a sandbox outcome to a failure reason; nonzero exits are not
/// failures (only the parsed output counts).
fn sandbox_failure(outcome: &ExecutionOutcome) -> Option<FailureReason> {
    if outcome.timed_out {
        Some(FailureReason::SandboxTimeout)
    } else if outcome.truncated {
        Some(FailureReason::SandboxTruncated)
    } else {
        None
    }
}

/// Parse the analysis response, degrading to an empty analysis when the
/// text carries no usable JSON.
fn parse_analysis(raw: &str) -> ExpertAnalysis {
    recover_json_value(raw)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analysis_degrades_gracefully() {
        let analysis = parse_analysis("no json here at all");
        assert_eq!(analysis, ExpertAnalysis::default());

        let analysis = parse_analysis(
            "Some prose.\n```json\n{\"overall_assessment\": \"fine\"}\n```",
        );
        assert_eq!(analysis.overall_assessment, "fine");
    }

    #[test]
    fn test_sandbox_failure_mapping() {
        let outcome = ExecutionOutcome {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
            wall_ms: 10,
            timed_out: false,
            truncated: false,
        };
        assert_eq!(sandbox_failure(&outcome), None);

        let timed_out = ExecutionOutcome {
            timed_out: true,
            ..outcome.clone()
        };
        assert_eq!(sandbox_failure(&timed_out), Some(FailureReason::SandboxTimeout));

        let truncated = ExecutionOutcome {
            truncated: true,
            ..outcome
        };
        assert_eq!(
            sandbox_failure(&truncated),
            Some(FailureReason::SandboxTruncated)
        );
    }
}
