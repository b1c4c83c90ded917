//! Main configuration structure for quantlab.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// LLM endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Script sandbox configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Orchestrator loop configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the application SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Path to the read-only historical market-data SQLite file
    #[serde(default = "default_market_data_path")]
    pub market_data_path: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".quantlab/quantlab.db".to_string()
}

fn default_market_data_path() -> String {
    ".quantlab/market.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            market_data_path: default_market_data_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for daily-rotated JSON log files
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// LLM endpoint configuration (provider-opaque from the core's view).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// API key; falls back to the ANTHROPIC_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Max tokens per generation
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; 0 keeps requests deterministic
    #[serde(default)]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests per minute admitted to the endpoint
    #[serde(default = "default_llm_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_llm_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

const fn default_llm_max_tokens() -> u32 {
    8192
}

const fn default_llm_timeout_secs() -> u64 {
    120
}

const fn default_llm_requests_per_minute() -> u32 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            requests_per_minute: default_llm_requests_per_minute(),
        }
    }
}

/// Script sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Interpreter invoked on the generated source file
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Root under which per-run working directories are created
    #[serde(default = "default_workdir_root")]
    pub workdir_root: String,

    /// Wall-clock cap for scanner runs, seconds
    #[serde(default = "default_scanner_timeout_secs")]
    pub scanner_timeout_secs: u64,

    /// Wall-clock cap for executor runs, seconds
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,

    /// Stdout byte cap before the run is killed as truncated
    #[serde(default = "default_stdout_byte_cap")]
    pub stdout_byte_cap: usize,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_workdir_root() -> String {
    ".quantlab/sandbox".to_string()
}

const fn default_scanner_timeout_secs() -> u64 {
    300
}

const fn default_executor_timeout_secs() -> u64 {
    30
}

const fn default_stdout_byte_cap() -> usize {
    10 * 1024 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            workdir_root: default_workdir_root(),
            scanner_timeout_secs: default_scanner_timeout_secs(),
            executor_timeout_secs: default_executor_timeout_secs(),
            stdout_byte_cap: default_stdout_byte_cap(),
        }
    }
}

/// Orchestrator loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Global cap on concurrently active sandboxes
    #[serde(default = "default_max_concurrent_sandboxes")]
    pub max_concurrent_sandboxes: usize,

    /// Consecutive FAILED iterations before the agent is auto-paused
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Scanner-generation retries after the first attempt
    #[serde(default = "default_generation_retries")]
    pub generation_retries: u32,

    /// Base backoff between generation retries, seconds
    #[serde(default = "default_generation_backoff_base_secs")]
    pub generation_backoff_base_secs: u64,

    /// Backoff cap between generation retries, seconds
    #[serde(default = "default_generation_backoff_cap_secs")]
    pub generation_backoff_cap_secs: u64,
}

const fn default_max_concurrent_sandboxes() -> usize {
    4
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

const fn default_generation_retries() -> u32 {
    2
}

const fn default_generation_backoff_base_secs() -> u64 {
    2
}

const fn default_generation_backoff_cap_secs() -> u64 {
    16
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sandboxes: default_max_concurrent_sandboxes(),
            max_consecutive_failures: default_max_consecutive_failures(),
            generation_retries: default_generation_retries(),
            generation_backoff_base_secs: default_generation_backoff_base_secs(),
            generation_backoff_cap_secs: default_generation_backoff_cap_secs(),
        }
    }
}
