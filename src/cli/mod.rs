//! Command-line interface definitions.

pub mod display;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "quantlab", version, about = "Autonomous trading-strategy learning laboratory")]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = "quantlab.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage agents
    #[command(subcommand)]
    Agent(AgentCommands),
    /// Run learning iterations
    #[command(subcommand)]
    Run(RunCommands),
    /// Inspect iterations
    #[command(subcommand)]
    Iteration(IterationCommands),
    /// Inspect accumulated knowledge
    #[command(subcommand)]
    Knowledge(KnowledgeCommands),
    /// Inspect promoted strategy versions
    #[command(subcommand)]
    Version(VersionCommands),
    /// Inspect the activity log
    #[command(subcommand)]
    Log(LogCommands),
}

#[derive(Debug, Subcommand)]
pub enum AgentCommands {
    /// Create an agent from seed instructions
    Create {
        /// The human seed the agent evolves from
        #[arg(long)]
        instructions: String,
        /// Display name (derived from the instructions when omitted)
        #[arg(long)]
        name: Option<String>,
        /// Template-library executors only; never generate a custom executor
        #[arg(long)]
        discovery: bool,
    },
    /// List agents
    List {
        /// Filter by status (learning, paper_trading, live_trading, paused)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one agent
    Show { agent_id: Uuid },
    /// Pause an agent
    Pause { agent_id: Uuid },
    /// Resume a paused agent into its prior status
    Resume { agent_id: Uuid },
    /// Graduate learning -> paper trading
    Graduate {
        agent_id: Uuid,
        /// Bypass the eligibility gates (recorded in the activity log)
        #[arg(long)]
        force: bool,
    },
    /// Promote paper trading -> live trading
    Promote { agent_id: Uuid },
    /// Demote one rung (live -> paper, paper -> learning)
    Demote {
        agent_id: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Delete an agent and everything it owns
    Delete { agent_id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum RunCommands {
    /// Run exactly one iteration
    Once {
        agent_id: Uuid,
        #[command(flatten)]
        opts: RunOnceArgs,
    },
    /// Run the continuous loop until convergence or the iteration budget
    Loop {
        agent_id: Uuid,
        #[arg(long)]
        max_iterations: Option<u64>,
        /// Iterations before convergence is consulted
        #[arg(long, default_value_t = 3)]
        min_iterations: u64,
        /// Keep looping even after convergence is declared
        #[arg(long)]
        no_stop_on_convergence: bool,
    },
}

#[derive(Debug, Args)]
pub struct RunOnceArgs {
    /// One-off operator guidance, prioritised over learned knowledge
    #[arg(long)]
    pub guidance: Option<String>,
    /// Per-LLM-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Override the agent's discovery-mode flag for this iteration
    #[arg(long)]
    pub discovery_mode: Option<bool>,
}

#[derive(Debug, Subcommand)]
pub enum IterationCommands {
    /// List an agent's iterations
    List {
        agent_id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one iteration with sources and prompts
    Show { iteration_id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum KnowledgeCommands {
    /// List an agent's knowledge entries
    List {
        agent_id: Uuid,
        /// Filter by kind (INSIGHT, PARAMETER_PREF, PATTERN_RULE)
        #[arg(long)]
        kind: Option<String>,
        /// Filter by pattern tag
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum VersionCommands {
    /// List an agent's promoted strategy versions
    List { agent_id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum LogCommands {
    /// List an agent's activity events
    List {
        agent_id: Uuid,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_agent_create() {
        let cli = Cli::parse_from([
            "quantlab",
            "agent",
            "create",
            "--instructions",
            "Find VWAP bounces",
            "--discovery",
        ]);
        match cli.command {
            Commands::Agent(AgentCommands::Create {
                instructions,
                name,
                discovery,
            }) => {
                assert_eq!(instructions, "Find VWAP bounces");
                assert!(name.is_none());
                assert!(discovery);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_loop_flags() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from([
            "quantlab",
            "run",
            "loop",
            &id.to_string(),
            "--max-iterations",
            "10",
            "--no-stop-on-convergence",
        ]);
        match cli.command {
            Commands::Run(RunCommands::Loop {
                agent_id,
                max_iterations,
                min_iterations,
                no_stop_on_convergence,
            }) => {
                assert_eq!(agent_id, id);
                assert_eq!(max_iterations, Some(10));
                assert_eq!(min_iterations, 3);
                assert!(no_stop_on_convergence);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
