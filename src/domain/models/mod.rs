//! Domain models for the quantlab learning loop.

pub mod activity;
pub mod agent;
pub mod analysis;
pub mod backtest;
pub mod config;
pub mod iteration;
pub mod knowledge;
pub mod market;
pub mod signal;
pub mod strategy_version;

pub use activity::ActivityEvent;
pub use agent::{Agent, AgentStatus, Personality, RiskTolerance, TradingStyle};
pub use analysis::{ExecutionAnalysis, ExpertAnalysis, PatternQuality, Recommendations};
pub use backtest::{trade_level_sharpe, BacktestReport, TemplateMetrics};
pub use config::{
    Config, DatabaseConfig, LlmConfig, LoggingConfig, OrchestratorConfig, SandboxConfig,
};
pub use iteration::{FailureReason, Iteration, IterationStatus};
pub use knowledge::{KnowledgeEntry, KnowledgeKind};
pub use market::{average_true_range, Bar, DailyMetrics, Timeframe};
pub use signal::{position_size, ExitReason, Signal, TradeRecord, TradeSide, TRADE_NOTIONAL};
pub use strategy_version::StrategyVersion;
