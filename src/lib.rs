//! Quantlab - autonomous trading-strategy learning laboratory.
//!
//! Agents author scanner/executor pairs through an LLM, backtest them in a
//! sandbox against historical market data, have the results critiqued, and
//! fold the critique into accumulated knowledge that conditions the next
//! iteration. The crate provides:
//! - the iteration orchestrator and its one-way state machine
//! - deterministic prompt-context assembly with the anti-lookahead contract
//! - a subprocess sandbox hardened against adversarial generated code
//! - robust stdout parsing (JSON or log scrape) into signals and trades
//! - the fixed execution-template library and the backtest evaluator
//! - knowledge extraction with Jaccard deduplication
//! - the convergence and graduation detector
//! - SQLite persistence (agents, iterations, knowledge, versions, audit log)

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{DomainError, DomainResult};
