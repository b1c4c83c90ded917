//! Shared fixtures for the integration suite: an in-memory migrated
//! application database, a synthetic trending market store, a scripted
//! LLM, and a shell-based sandbox.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use quantlab::adapters::llm::ScriptedLlm;
use quantlab::adapters::sqlite::market_data::MARKET_TEST_SCHEMA;
use quantlab::adapters::sqlite::{
    create_migrated_test_pool, open_memory_pool, SqliteActivityLog, SqliteAgentRepository,
    SqliteIterationRepository, SqliteKnowledgeRepository, SqliteMarketDataStore,
    SqliteStrategyVersionRepository,
};
use quantlab::domain::models::{OrchestratorConfig, SandboxConfig};
use quantlab::domain::ports::MarketDataStore;
use quantlab::services::{
    AgentService, BacktestEvaluator, ConvergenceConfig, ConvergenceDetector, EvaluatorConfig,
    GraduationConfig, IterationOrchestrator, KnowledgeExtractor, ScriptSandbox,
};

/// Epoch base for all seeded bars.
pub const BASE_TS: i64 = 1_700_000_000;

pub struct Harness {
    pub orchestrator: Arc<IterationOrchestrator>,
    pub service: AgentService,
    pub agents: Arc<SqliteAgentRepository>,
    pub iterations: Arc<SqliteIterationRepository>,
    pub knowledge: Arc<SqliteKnowledgeRepository>,
    pub activity: Arc<SqliteActivityLog>,
    pub llm: Arc<ScriptedLlm>,
    _workdir: TempDir,
}

/// A harness with default scripted responses still to be queued.
pub async fn harness() -> Harness {
    harness_with(ScriptedLlm::new(), 2).await
}

pub async fn harness_with(llm: ScriptedLlm, scanner_timeout_secs: u64) -> Harness {
    let pool = create_migrated_test_pool().await.expect("app pool");
    let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
    let iterations = Arc::new(SqliteIterationRepository::new(pool.clone()));
    let knowledge = Arc::new(SqliteKnowledgeRepository::new(pool.clone()));
    let versions = Arc::new(SqliteStrategyVersionRepository::new(pool.clone()));
    let activity = Arc::new(SqliteActivityLog::new(pool));

    let market = trending_market_store().await;

    let workdir = tempfile::tempdir().expect("sandbox root");
    let sandbox = Arc::new(ScriptSandbox::new(SandboxConfig {
        interpreter: "sh".to_string(),
        workdir_root: workdir.path().to_string_lossy().into_owned(),
        scanner_timeout_secs,
        executor_timeout_secs: 2,
        stdout_byte_cap: 1024 * 1024,
    }));

    let evaluator = Arc::new(BacktestEvaluator::new(
        market.clone(),
        EvaluatorConfig::default(),
    ));
    let extractor = Arc::new(KnowledgeExtractor::new(knowledge.clone()));
    let detector = Arc::new(ConvergenceDetector::new(
        iterations.clone(),
        knowledge.clone(),
        ConvergenceConfig::default(),
        GraduationConfig::default(),
    ));

    let llm = Arc::new(llm);
    let orchestrator = Arc::new(IterationOrchestrator::new(
        agents.clone(),
        iterations.clone(),
        knowledge.clone(),
        activity.clone(),
        llm.clone(),
        market,
        sandbox,
        evaluator,
        extractor,
        detector.clone(),
        OrchestratorConfig {
            max_concurrent_sandboxes: 2,
            max_consecutive_failures: 5,
            generation_retries: 0,
            generation_backoff_base_secs: 1,
            generation_backoff_cap_secs: 1,
        },
    ));

    let service = AgentService::new(
        agents.clone(),
        iterations.clone(),
        versions,
        activity.clone(),
        detector,
    );

    Harness {
        orchestrator,
        service,
        agents,
        iterations,
        knowledge,
        activity,
        llm,
        _workdir: workdir,
    }
}

/// Seed 120 five-minute AAPL bars climbing 0.2% per bar.
async fn trending_market_store() -> Arc<dyn MarketDataStore> {
    let pool = open_memory_pool().await.expect("market pool");
    sqlx::raw_sql(MARKET_TEST_SCHEMA)
        .execute(&pool)
        .await
        .expect("market schema");

    let mut price = 100.0_f64;
    for i in 0..120i64 {
        let ts = Utc.timestamp_opt(BASE_TS + i * 300, 0).unwrap();
        let open = price;
        let close = price * 1.002;
        sqlx::query(
            "INSERT INTO bars (ticker, timestamp, timeframe, open, high, low, close, volume, time_of_day)
             VALUES ('AAPL', ?, '5min', ?, ?, ?, ?, 5000, NULL)",
        )
        .bind(ts.to_rfc3339())
        .bind(open)
        .bind(close * 1.001)
        .bind(open * 0.999)
        .bind(close)
        .execute(&pool)
        .await
        .expect("seed bar");
        price = close;
    }

    Arc::new(SqliteMarketDataStore::from_pool(pool, "/tmp/test-market.db"))
}

/// RFC3339 timestamp of the seeded bar at `offset_bars`.
pub fn bar_time(offset_bars: i64) -> String {
    Utc.timestamp_opt(BASE_TS + offset_bars * 300, 0)
        .unwrap()
        .to_rfc3339()
}

/// An LLM response whose code block is a shell script emitting the given
/// stdout payload.
pub fn code_response(stdout_payload: &str) -> String {
    format!(
        "The scan keys off the seeded trend.\n\n```sh\necho '{stdout_payload}'\n```\n"
    )
}

/// A scanner response emitting two in-range AAPL signals.
pub fn two_signal_scanner() -> String {
    code_response(&format!(
        r#"[{{"ticker": "AAPL", "timestamp": "{}"}}, {{"ticker": "AAPL", "timestamp": "{}"}}]"#,
        bar_time(20),
        bar_time(40),
    ))
}

/// An executor response that drains stdin and emits one profitable trade.
pub fn one_trade_executor() -> String {
    format!(
        "Exit on strength two hours in.\n\n```sh\ncat - > /dev/null\necho '[{{\"ticker\": \"AAPL\", \"entry_time\": \"{}\", \"exit_time\": \"{}\", \"entry_price\": 100.0, \"exit_price\": 104.0}}]'\n```\n",
        bar_time(21),
        bar_time(45),
    )
}

/// A structured analysis response in the fixed schema (fenced JSON, the
/// way the analysis prompt asks for it).
pub fn analysis_response() -> String {
    let body = r#"{"overall_assessment": "trend capture works", "pattern_quality": {"signal_clarity": "clean", "market_conditions": "trending", "edge_strength": "moderate"}, "execution_analysis": {"template_comparison": "price_action rode the trend; conservative capped winners early", "exit_timing_issues": ["exits clustered at the session close"], "stop_loss_effectiveness": "stops unused in the window", "take_profit_effectiveness": "targets too tight", "suggested_improvements": ["widen targets on trend days"]}, "recommendations": {"scanning": ["require rising volume"], "execution": ["trail stops in trends"], "risk_management": ["cap exposure per ticker"]}}"#;
    format!("```json\n{body}\n```\n")
}
