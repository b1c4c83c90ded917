//! Adapters: concrete implementations of the domain ports.

pub mod llm;
pub mod sqlite;
