//! Quantlab CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use quantlab::adapters::llm::AnthropicLlmClient;
use quantlab::adapters::sqlite::{
    initialize_database, SqliteActivityLog, SqliteAgentRepository, SqliteIterationRepository,
    SqliteKnowledgeRepository, SqliteMarketDataStore, SqliteStrategyVersionRepository,
};
use quantlab::cli::{
    display, AgentCommands, Cli, Commands, IterationCommands, KnowledgeCommands, LogCommands,
    RunCommands, VersionCommands,
};
use quantlab::domain::models::{AgentStatus, Config, KnowledgeKind};
use quantlab::domain::ports::{
    ActivityLog, IterationRepository, KnowledgeRepository, StrategyVersionRepository,
};
use quantlab::infrastructure::{config::ConfigLoader, logging};
use quantlab::services::{
    AgentService, BacktestEvaluator, ContinuousOptions, ConvergenceConfig, ConvergenceDetector,
    EvaluatorConfig, GraduationConfig, IterationOrchestrator, KnowledgeExtractor, RunOnceOptions,
    ScriptSandbox,
};

struct Core {
    agents: Arc<SqliteAgentRepository>,
    iterations: Arc<SqliteIterationRepository>,
    knowledge: Arc<SqliteKnowledgeRepository>,
    versions: Arc<SqliteStrategyVersionRepository>,
    activity: Arc<SqliteActivityLog>,
    detector: Arc<ConvergenceDetector>,
    config: Config,
}

impl Core {
    async fn init(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database.path, config.database.max_connections)
            .await
            .context("Failed to open application database")?;

        let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let iterations = Arc::new(SqliteIterationRepository::new(pool.clone()));
        let knowledge = Arc::new(SqliteKnowledgeRepository::new(pool.clone()));
        let versions = Arc::new(SqliteStrategyVersionRepository::new(pool.clone()));
        let activity = Arc::new(SqliteActivityLog::new(pool));
        let detector = Arc::new(ConvergenceDetector::new(
            iterations.clone(),
            knowledge.clone(),
            ConvergenceConfig::default(),
            GraduationConfig::default(),
        ));

        Ok(Self {
            agents,
            iterations,
            knowledge,
            versions,
            activity,
            detector,
            config,
        })
    }

    fn agent_service(&self) -> AgentService {
        AgentService::new(
            self.agents.clone(),
            self.iterations.clone(),
            self.versions.clone(),
            self.activity.clone(),
            self.detector.clone(),
        )
    }

    async fn orchestrator(&self) -> Result<Arc<IterationOrchestrator>> {
        let market = Arc::new(
            SqliteMarketDataStore::open(&self.config.database.market_data_path)
                .await
                .context("Failed to open market-data database (read-only)")?,
        );
        let sandbox = Arc::new(ScriptSandbox::new(self.config.sandbox.clone()));
        let evaluator = Arc::new(BacktestEvaluator::new(
            market.clone(),
            EvaluatorConfig::default(),
        ));
        let llm = Arc::new(
            AnthropicLlmClient::new(self.config.llm.clone())
                .context("Failed to build LLM client")?,
        );
        let extractor = Arc::new(KnowledgeExtractor::new(self.knowledge.clone()));

        Ok(Arc::new(IterationOrchestrator::new(
            self.agents.clone(),
            self.iterations.clone(),
            self.knowledge.clone(),
            self.activity.clone(),
            llm,
            market,
            sandbox,
            evaluator,
            extractor,
            self.detector.clone(),
            self.config.orchestrator.clone(),
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_from(&cli.config).context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging)?;

    let core = Core::init(config).await?;
    let json = cli.json;

    match cli.command {
        Commands::Agent(command) => handle_agent(&core, command, json).await?,
        Commands::Run(command) => handle_run(&core, command, json).await?,
        Commands::Iteration(command) => handle_iteration(&core, command, json).await?,
        Commands::Knowledge(command) => handle_knowledge(&core, command, json).await?,
        Commands::Version(command) => handle_version(&core, command, json).await?,
        Commands::Log(command) => handle_log(&core, command, json).await?,
    }

    Ok(())
}

async fn handle_agent(core: &Core, command: AgentCommands, json: bool) -> Result<()> {
    let service = core.agent_service();

    match command {
        AgentCommands::Create {
            instructions,
            name,
            discovery,
        } => {
            let agent = service.create_agent(&instructions, name, discovery).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&agent)?);
            } else {
                println!("Created agent {} ({})", agent.name, agent.id);
                println!("{}", display::agents_table(&[agent]));
            }
        }
        AgentCommands::List { status } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    AgentStatus::parse_str(s)
                        .with_context(|| format!("unknown agent status: {s}"))?,
                ),
                None => None,
            };
            let agents = service.list_agents(status).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&agents)?);
            } else {
                println!("{}", display::agents_table(&agents));
            }
        }
        AgentCommands::Show { agent_id } => {
            let agent = service.get_agent(agent_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&agent)?);
            } else {
                println!("{}", display::agents_table(&[agent.clone()]));
                println!("instructions: {}", agent.instructions);
            }
        }
        AgentCommands::Pause { agent_id } => {
            let agent = service.pause(agent_id).await?;
            println!("Agent {} paused", agent.id);
        }
        AgentCommands::Resume { agent_id } => {
            let agent = service.resume(agent_id).await?;
            println!("Agent {} resumed into {}", agent.id, agent.status.as_str());
        }
        AgentCommands::Graduate { agent_id, force } => {
            let agent = service.graduate(agent_id, force).await?;
            println!("Agent {} graduated to {}", agent.id, agent.status.as_str());
        }
        AgentCommands::Promote { agent_id } => {
            let agent = service.promote_live(agent_id).await?;
            println!("Agent {} promoted to {}", agent.id, agent.status.as_str());
        }
        AgentCommands::Demote { agent_id, reason } => {
            let agent = service.demote(agent_id, &reason).await?;
            println!("Agent {} demoted to {}", agent.id, agent.status.as_str());
        }
        AgentCommands::Delete { agent_id } => {
            service.delete_agent(agent_id).await?;
            println!("Agent {agent_id} deleted");
        }
    }

    Ok(())
}

async fn handle_run(core: &Core, command: RunCommands, json: bool) -> Result<()> {
    let orchestrator = core.orchestrator().await?;

    match command {
        RunCommands::Once { agent_id, opts } => {
            let iteration = orchestrator
                .run_once(
                    agent_id,
                    RunOnceOptions {
                        manual_guidance: opts.guidance,
                        timeout_ms: opts.timeout_ms,
                        discovery_mode_override: opts.discovery_mode,
                    },
                )
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&iteration)?);
            } else {
                println!("{}", display::iteration_detail(&iteration));
            }
        }
        RunCommands::Loop {
            agent_id,
            max_iterations,
            min_iterations,
            no_stop_on_convergence,
        } => {
            let mut stream = orchestrator.run_continuous(
                agent_id,
                ContinuousOptions {
                    max_iterations,
                    min_iterations,
                    stop_on_convergence: !no_stop_on_convergence,
                },
            );

            // Ctrl-C requests a stop between iterations; the in-flight
            // iteration still runs to completion or failure.
            let stopper = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Stopping after the current iteration...");
                    stopper.stop_continuous(agent_id).await;
                }
            });

            while let Some(result) = stream.recv().await {
                match result {
                    Ok(iteration) => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&iteration)?);
                        } else {
                            println!(
                                "iteration {}: {} signals, winner {}",
                                iteration.iteration_number,
                                iteration.signals_found,
                                iteration.winning_template.as_deref().unwrap_or("-")
                            );
                        }
                    }
                    Err(err) => eprintln!("iteration failed: {err}"),
                }
            }
            println!("Loop finished");
        }
    }

    Ok(())
}

async fn handle_iteration(core: &Core, command: IterationCommands, json: bool) -> Result<()> {
    match command {
        IterationCommands::List { agent_id, limit } => {
            let iterations = core.iterations.list_for_agent(agent_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&iterations)?);
            } else {
                println!("{}", display::iterations_table(&iterations));
            }
        }
        IterationCommands::Show { iteration_id } => {
            let iteration = core
                .iterations
                .get(iteration_id)
                .await?
                .with_context(|| format!("iteration {iteration_id} not found"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&iteration)?);
            } else {
                println!("{}", display::iteration_detail(&iteration));
            }
        }
    }

    Ok(())
}

async fn handle_knowledge(core: &Core, command: KnowledgeCommands, json: bool) -> Result<()> {
    match command {
        KnowledgeCommands::List { agent_id, kind, tag } => {
            let kind = match kind.as_deref() {
                Some(k) => Some(
                    KnowledgeKind::parse_str(k)
                        .with_context(|| format!("unknown knowledge kind: {k}"))?,
                ),
                None => None,
            };
            let entries = core.knowledge.list_filtered(agent_id, kind, tag).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{}", display::knowledge_table(&entries));
            }
        }
    }

    Ok(())
}

async fn handle_version(core: &Core, command: VersionCommands, json: bool) -> Result<()> {
    match command {
        VersionCommands::List { agent_id } => {
            let versions = core.versions.list_for_agent(agent_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&versions)?);
            } else {
                println!("{}", display::versions_table(&versions));
            }
        }
    }

    Ok(())
}

async fn handle_log(core: &Core, command: LogCommands, json: bool) -> Result<()> {
    match command {
        LogCommands::List { agent_id, limit } => {
            let events = core.activity.list_for_agent(agent_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                println!("{}", display::events_table(&events));
            }
        }
    }

    Ok(())
}
