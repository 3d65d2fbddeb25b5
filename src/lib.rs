//! monarch-runner: sandbox pool, gate execution and fail-closed diagnostics
//! for agent-driven code verification.
//!
//! This library keeps one warm sandbox per (project, stack), runs quality
//! gates inside it or through a judgment backend, turns tool output into
//! uniform diagnostics, and caps verification attempts per task.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod eval;
pub mod gates;
pub mod llm;
pub mod metrics;
pub mod parser;
pub mod runner;
pub mod runtime;
pub mod tasks;

// Re-export commonly used error types
pub use error::{
    BreakerError, ConfigError, EvalError, GateError, LlmError, ParseError, RuntimeError,
    StoreError,
};
