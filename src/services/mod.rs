//! Services: the learning loop proper.

pub mod agent_service;
pub mod convergence;
pub mod evaluator;
pub mod knowledge_extractor;
pub mod orchestrator;
pub mod output_parser;
pub mod personality;
pub mod prompt_assembler;
pub mod sandbox;
pub mod templates;

pub use agent_service::AgentService;
pub use convergence::{
    ConvergenceConfig, ConvergenceDecision, ConvergenceDetector, GraduationConfig,
    GraduationDecision,
};
pub use evaluator::{BacktestEvaluator, EvaluatorConfig, CUSTOM_TAG};
pub use knowledge_extractor::{KnowledgeExtractor, KnowledgeOutcome};
pub use orchestrator::{ContinuousOptions, IterationOrchestrator, RunOnceOptions};
pub use output_parser::{parse_signals, parse_trades, recover_json_value};
pub use personality::parse_personality;
pub use prompt_assembler::{PromptAssembler, PromptContext, ANTI_LOOKAHEAD_CONTRACT, KNOWLEDGE_CAP};
pub use sandbox::{ExecutionOutcome, ExecutionRequest, SandboxError, ScriptSandbox};
pub use templates::ExecutionTemplate;
